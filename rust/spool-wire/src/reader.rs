use std::io::{self, Read};

use crate::frame::{FRAME_HEADER_LEN, FrameError, decode_header};

/// Reads frames and reassembles whole messages.
///
/// No read-ahead: exactly one header and one body are consumed per frame, so
/// the channel can be handed to another reader between messages. The caller
/// is responsible for holding the channel's read lock for the duration of
/// [`read_message`](Self::read_message).
#[derive(Debug)]
pub struct FrameReader<R: Read> {
    inner: R,
    max_frame_len: usize,
}

impl<R: Read> FrameReader<R> {
    /// Wrap `reader`, rejecting frames larger than `max_frame_len`.
    pub fn new(reader: R, max_frame_len: usize) -> Self {
        Self {
            inner: reader,
            max_frame_len,
        }
    }

    /// Read one frame and append its body to `buf`.
    ///
    /// Returns the body length; 0 means the frame was a terminator.
    pub fn read_frame(&mut self, buf: &mut Vec<u8>) -> Result<usize, FrameError> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let got = read_full(&mut self.inner, &mut header)?;
        if got == 0 {
            return Err(FrameError::Closed);
        }
        if got < FRAME_HEADER_LEN {
            return Err(FrameError::Truncated {
                expected: FRAME_HEADER_LEN,
                got,
            });
        }

        let len = decode_header(header);
        if len > self.max_frame_len {
            return Err(FrameError::Oversized {
                len,
                max: self.max_frame_len,
            });
        }
        if len == 0 {
            return Ok(0);
        }

        let start = buf.len();
        buf.resize(start + len, 0);
        let got = read_full(&mut self.inner, &mut buf[start..])?;
        if got < len {
            buf.truncate(start + got);
            return Err(FrameError::Truncated { expected: len, got });
        }
        Ok(len)
    }

    /// Read frames up to and including the next terminator and return the
    /// concatenated bodies.
    pub fn read_message(&mut self) -> Result<Vec<u8>, FrameError> {
        let mut message = Vec::new();
        let mut frames = 0usize;

        loop {
            match self.read_frame(&mut message) {
                Ok(0) => break,
                Ok(_) => frames += 1,
                Err(FrameError::Closed) if frames > 0 => {
                    return Err(FrameError::Unterminated {
                        frames,
                        bytes: message.len(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        tracing::trace!(frames, bytes = message.len(), "read message");
        Ok(message)
    }

    /// The underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }
}

/// Fill `buf` as far as the reader allows; a short count means end of stream.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
