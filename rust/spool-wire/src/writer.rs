use std::io::{BufWriter, Write};

use crate::frame::{FRAME_HEADER_LEN, FrameError, MAX_FRAME_LEN, encode_header};

/// User-space buffer in front of the channel. Small frames are coalesced into
/// fewer syscalls; frames at least this large bypass it.
const WRITE_BUFFER_CAPACITY: usize = 8 * 1024;

/// What a call to [`FrameWriter::write_message`] put on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageStats {
    /// Data frames written, not counting the terminator.
    pub frames: usize,
    /// Payload bytes written, not counting headers.
    pub bytes: usize,
}

/// Writes whole messages as chunked frames followed by a terminator.
///
/// The caller is responsible for holding the channel's write lock for the
/// duration of [`write_message`](Self::write_message).
pub struct FrameWriter<W: Write> {
    inner: BufWriter<W>,
    chunk_size: usize,
}

impl<W: Write> std::fmt::Debug for FrameWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter")
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl<W: Write> FrameWriter<W> {
    /// Wrap `writer`, splitting messages into frames of at most `chunk_size`
    /// bytes.
    ///
    /// Panics if `chunk_size` is 0 or above [`MAX_FRAME_LEN`].
    pub fn new(writer: W, chunk_size: usize) -> Self {
        assert!(
            (1..=MAX_FRAME_LEN).contains(&chunk_size),
            "chunk size must be in 1..={}",
            MAX_FRAME_LEN
        );
        Self {
            inner: BufWriter::with_capacity(WRITE_BUFFER_CAPACITY, writer),
            chunk_size,
        }
    }

    /// Maximum data frame size.
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Write `payload` as `ceil(len / chunk_size)` data frames and one
    /// terminator, then flush.
    ///
    /// When this returns `Ok`, the whole message is in the channel. An empty
    /// payload produces the terminator alone.
    pub fn write_message(&mut self, payload: &[u8]) -> Result<MessageStats, FrameError> {
        let mut stats = MessageStats::default();

        for chunk in payload.chunks(self.chunk_size) {
            self.write_frame(chunk)?;
            stats.frames += 1;
            stats.bytes += chunk.len();
        }

        self.write_terminator()?;
        self.inner.flush()?;

        tracing::trace!(
            frames = stats.frames,
            bytes = stats.bytes,
            chunk_size = self.chunk_size,
            "wrote message"
        );
        Ok(stats)
    }

    /// Buffer a single data frame. Not flushed.
    ///
    /// An empty `chunk` would read back as a terminator, so it is skipped.
    pub fn write_frame(&mut self, chunk: &[u8]) -> Result<(), FrameError> {
        if chunk.is_empty() {
            return Ok(());
        }
        if chunk.len() > self.chunk_size {
            return Err(FrameError::Oversized {
                len: chunk.len(),
                max: self.chunk_size,
            });
        }
        let header = encode_header(chunk.len());
        debug_assert_eq!(header.len(), FRAME_HEADER_LEN);
        self.inner.write_all(&header)?;
        self.inner.write_all(chunk)?;
        Ok(())
    }

    /// Buffer the end-of-message marker. Not flushed.
    pub fn write_terminator(&mut self) -> Result<(), FrameError> {
        self.inner.write_all(&encode_header(0))?;
        Ok(())
    }

    /// Push buffered frames to the channel.
    pub fn flush(&mut self) -> Result<(), FrameError> {
        self.inner.flush()?;
        Ok(())
    }

    /// The underlying writer.
    pub fn get_ref(&self) -> &W {
        self.inner.get_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::decode_header;

    /// Split a wire image into frame bodies (terminators included as empty).
    fn frames(wire: &[u8]) -> Vec<&[u8]> {
        let mut out = Vec::new();
        let mut rest = wire;
        while !rest.is_empty() {
            let (header, tail) = rest.split_at(FRAME_HEADER_LEN);
            let len = decode_header(header.try_into().unwrap());
            let (body, tail) = tail.split_at(len);
            out.push(body);
            rest = tail;
        }
        out
    }

    #[test]
    fn splits_into_chunks_and_terminates() {
        let mut writer = FrameWriter::new(Vec::new(), 4);
        let stats = writer.write_message(b"abcdefghij").unwrap();
        assert_eq!(stats, MessageStats { frames: 3, bytes: 10 });

        let wire = writer.get_ref().clone();
        assert_eq!(frames(&wire), vec![&b"abcd"[..], b"efgh", b"ij", b""]);
    }

    #[test]
    fn exact_multiple_has_no_short_frame() {
        let mut writer = FrameWriter::new(Vec::new(), 3);
        let stats = writer.write_message(b"abcdef").unwrap();
        assert_eq!(stats.frames, 2);
        assert_eq!(frames(writer.get_ref()), vec![&b"abc"[..], b"def", b""]);
    }

    #[test]
    fn empty_payload_is_terminator_only() {
        let mut writer = FrameWriter::new(Vec::new(), 1024);
        let stats = writer.write_message(b"").unwrap();
        assert_eq!(stats, MessageStats { frames: 0, bytes: 0 });
        assert_eq!(writer.get_ref().as_slice(), &[0, 0, 0, 0]);
    }

    #[test]
    fn payload_smaller_than_chunk_is_one_frame() {
        let mut writer = FrameWriter::new(Vec::new(), 4096);
        writer.write_message(b"tiny").unwrap();
        assert_eq!(frames(writer.get_ref()), vec![&b"tiny"[..], b""]);
    }

    #[test]
    fn messages_are_flushed_one_after_another() {
        let mut writer = FrameWriter::new(Vec::new(), 2);
        writer.write_message(b"xyz").unwrap();
        writer.write_message(b"").unwrap();
        writer.write_message(b"q").unwrap();
        assert_eq!(
            frames(writer.get_ref()),
            vec![&b"xy"[..], b"z", b"", b"", b"q", b""]
        );
    }

    #[test]
    fn frames_can_be_written_by_hand() {
        let mut writer = FrameWriter::new(Vec::new(), 4);
        writer.write_frame(b"ab").unwrap();
        writer.write_frame(b"").unwrap();
        assert!(matches!(
            writer.write_frame(b"too long"),
            Err(FrameError::Oversized { len: 8, max: 4 })
        ));
        writer.write_terminator().unwrap();
        writer.flush().unwrap();
        assert_eq!(frames(writer.get_ref()), vec![&b"ab"[..], b""]);
    }

    #[test]
    #[should_panic(expected = "chunk size")]
    fn zero_chunk_size_panics() {
        let _ = FrameWriter::new(Vec::new(), 0);
    }
}
