//! Process-shared primitives for IPC.
//!
//! This crate provides the small set of OS-level building blocks that several
//! cooperating processes can use at the same time:
//!
//! - [`ShmRegion`]: an anonymous memory file mapped `MAP_SHARED`. The mapping is
//!   inherited across `fork`, and the descriptor can be inherited across `exec`
//!   and mapped again with [`ShmRegion::attach`].
//! - [`ShmSemaphore`]: a bounded, process-shared counting semaphore living
//!   inside a region.
//! - [`ShmLock`]: a process-shared lock built on a binary semaphore.
//!
//! # Raw placement
//!
//! Semaphores and locks are placed at caller-chosen offsets of a region. They
//! hold a raw pointer into the mapping, so the caller keeps the region alive for
//! as long as any primitive placed in it is used.
//!
//! ```no_run
//! use shm_primitives::{ShmLock, ShmRegion, ShmSemaphore};
//!
//! let region = ShmRegion::create("example", 4096)?;
//! let gate = unsafe { ShmSemaphore::init(region.get_ptr(0), 4, 4)? };
//! let lock = unsafe { ShmLock::init(region.get_ptr(ShmSemaphore::SIZE))? };
//!
//! assert!(gate.acquire(false, None)?);
//! let _guard = lock.lock()?;
//! gate.release()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]

#[cfg(not(any(target_os = "linux", target_os = "android")))]
compile_error!("shm-primitives requires process-shared POSIX semaphores and memfd (Linux/Android)");

pub mod lock;
pub mod region;
pub mod semaphore;

pub use lock::{ShmLock, ShmLockGuard};
pub use region::ShmRegion;
pub use semaphore::{SEM_VALUE_MAX, SemaphoreError, ShmSemaphore};
