use std::io;

use shm_primitives::SemaphoreError;
use spool_wire::FrameError;

/// A codec error, boxed as-is.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from queue operations.
#[derive(Debug)]
pub enum QueueError {
    /// No capacity was available within the requested wait.
    Full,
    /// The requested `get` mode (non-blocking or timed) is not implemented.
    Unsupported,
    /// Every writer endpoint of the channel is closed.
    Closed,
    /// The codec failed to decode a message. The codec's error is preserved
    /// unchanged and can be recovered with `downcast_ref`.
    Decode(BoxError),
    /// The channel delivered a malformed or partial message.
    Frame(FrameError),
    /// A shared semaphore or lock failed.
    Semaphore(SemaphoreError),
    /// I/O error while creating or attaching queue resources.
    Io(io::Error),
    /// Invalid configuration.
    Config(String),
    /// Inherited queue handles are missing or do not describe a queue.
    Attach(String),
}

impl QueueError {
    /// True for [`QueueError::Full`].
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full)
    }
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "queue is full"),
            Self::Unsupported => write!(
                f,
                "only blocking get without a timeout is supported"
            ),
            Self::Closed => write!(f, "queue channel closed"),
            Self::Decode(e) => write!(f, "decode error: {}", e),
            Self::Frame(e) => write!(f, "framing error: {}", e),
            Self::Semaphore(e) => write!(f, "semaphore error: {}", e),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Config(e) => write!(f, "invalid queue configuration: {}", e),
            Self::Attach(e) => write!(f, "cannot attach to queue: {}", e),
        }
    }
}

impl std::error::Error for QueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e.as_ref()),
            Self::Frame(e) => Some(e),
            Self::Semaphore(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FrameError> for QueueError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Closed => Self::Closed,
            other => Self::Frame(other),
        }
    }
}

impl From<SemaphoreError> for QueueError {
    fn from(e: SemaphoreError) -> Self {
        Self::Semaphore(e)
    }
}

impl From<io::Error> for QueueError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
