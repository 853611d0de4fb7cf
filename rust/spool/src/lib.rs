//! Bounded cross-process message queue without a payload size limit.
//!
//! A conventional pipe-backed queue writes each item straight into the pipe,
//! so a producer whose item is larger than the kernel pipe buffer blocks in
//! `write` until a reader drains it. [`Queue`] splits the two concerns:
//!
//! - `put` only waits for capacity (a process-shared bounded semaphore) and
//!   stages the item in a per-process buffer.
//! - A feeder thread, started lazily once per process, encodes staged items
//!   and streams them onto the pipe as chunked frames under a process-shared
//!   write lock (see [`spool_wire`] for the frame format).
//! - `get` reads one whole message under a process-shared read lock, gives
//!   its capacity unit back and decodes it.
//!
//! Items are encoded with an injected [`Codec`]; the default is
//! [`Postcard`] over any [`facet::Facet`] type.
//!
//! # Sharing with other processes
//!
//! A child created with `fork` inherits the queue as-is. A child started with
//! [`std::process::Command`] receives it through a [`QueueTicket`]:
//!
//! ```no_run
//! use std::process::Command;
//! use spool::{Queue, QueueConfig, QueueTicket};
//!
//! // Parent
//! let queue: Queue<String> = Queue::new(QueueConfig::default())?;
//! let mut child = Command::new("worker");
//! queue.ticket().apply_to_command(&mut child, "jobs");
//! let mut child = child.spawn()?;
//! queue.put("work".to_string())?;
//!
//! // Child
//! if let Some(ticket) = QueueTicket::from_env("jobs")? {
//!     let queue: Queue<String> = unsafe { Queue::attach(&ticket)? };
//!     let job = queue.get()?;
//! }
//! # child.wait()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Limitations
//!
//! Only blocking `get` without a timeout is implemented. Channel reads and
//! writes are not cancellable. A feeder that dies in the middle of a message
//! leaves the channel without a terminator, which stalls or fails every later
//! `get`; treat it as fatal to the queue.

#![forbid(unsafe_op_in_unsafe_fn)]

pub mod codec;
mod config;
mod error;
mod feeder;
mod queue;
mod shared;
mod staging;
mod ticket;

pub use codec::{Codec, FnCodec, Postcard, PostcardError, Raw};
pub use config::{DEFAULT_CHUNK_SIZE, QueueConfig};
pub use error::{BoxError, QueueError};
pub use queue::Queue;
pub use shared::{QUEUE_MAGIC, QUEUE_VERSION, QueueHeader};
pub use ticket::{ENV_PREFIX, QueueTicket};
