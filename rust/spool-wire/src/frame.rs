use std::io;

/// Size of the per-frame length header in bytes.
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest frame body a header may announce.
///
/// The header is unsigned on the wire, but lengths above `i32::MAX` are
/// rejected so that peers using signed lengths agree on every valid frame.
pub const MAX_FRAME_LEN: usize = i32::MAX as usize;

/// Encode a frame length header. A length of 0 is the message terminator.
#[inline]
pub fn encode_header(len: usize) -> [u8; FRAME_HEADER_LEN] {
    debug_assert!(len <= MAX_FRAME_LEN);
    (len as u32).to_be_bytes()
}

/// Decode a frame length header.
#[inline]
pub fn decode_header(header: [u8; FRAME_HEADER_LEN]) -> usize {
    u32::from_be_bytes(header) as usize
}

/// Errors from reading or writing frames.
#[derive(Debug)]
pub enum FrameError {
    /// I/O error on the channel.
    Io(io::Error),
    /// The channel ended cleanly at a frame boundary: every writer is gone.
    Closed,
    /// The channel ended in the middle of a header or frame body.
    Truncated { expected: usize, got: usize },
    /// The channel ended after some frames of a message but before its
    /// terminator.
    Unterminated { frames: usize, bytes: usize },
    /// A frame is larger than the configured limit.
    Oversized { len: usize, max: usize },
}

impl FrameError {
    /// True when the channel can no longer deliver messages.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Self::Closed | Self::Truncated { .. } | Self::Unterminated { .. }
        )
    }
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "channel I/O error: {}", e),
            Self::Closed => write!(f, "channel closed"),
            Self::Truncated { expected, got } => write!(
                f,
                "channel ended mid-frame: expected {} bytes, got {}",
                expected, got
            ),
            Self::Unterminated { frames, bytes } => write!(
                f,
                "channel ended before message terminator ({} frames, {} bytes received)",
                frames, bytes
            ),
            Self::Oversized { len, max } => {
                write!(f, "frame of {} bytes exceeds limit of {} bytes", len, max)
            }
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
