//! Wire format for the spool queue.
//!
//! A message travels over a one-directional byte channel (an OS pipe) as a
//! sequence of frames:
//!
//! ```text
//! [len: u32 BE][len bytes]   data frame, 1 <= len <= chunk size
//! [len: u32 BE][len bytes]   ...
//! [0u32 BE]                  terminator: end of message
//! ```
//!
//! The frame header is transport-level: it only says where one write ends.
//! Messages carry no length of their own; the zero-length terminator is the
//! only message boundary, and the message is the concatenation of its data
//! frames. A zero-length message is a lone terminator.
//!
//! Writers must hold an exclusive lock for a whole message and readers for a
//! whole message, otherwise frames of different messages interleave.

#![forbid(unsafe_op_in_unsafe_fn)]

pub mod channel;
pub mod frame;
pub mod reader;
pub mod writer;

pub use channel::{ChannelReader, ChannelWriter, pipe};
pub use frame::{FRAME_HEADER_LEN, FrameError, MAX_FRAME_LEN, decode_header, encode_header};
pub use reader::FrameReader;
pub use writer::{FrameWriter, MessageStats};
