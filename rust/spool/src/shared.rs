//! Process-wide queue state: one shared region holding the semaphores, plus
//! the two pipe endpoints.

use std::mem::{offset_of, size_of};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use shm_primitives::{ShmLock, ShmRegion, ShmSemaphore};
use spool_wire::{ChannelReader, ChannelWriter, MAX_FRAME_LEN, pipe};
use static_assertions::const_assert;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::ticket::QueueTicket;

/// Identifies a queue region.
pub const QUEUE_MAGIC: [u8; 8] = *b"SPOOLQ\0\0";

/// Bumped whenever [`QueueHeader`] changes.
pub const QUEUE_VERSION: u32 = 1;

/// Layout of the shared region.
///
/// Written once by the creating process before any other process can see the
/// region; afterwards only the semaphores change.
#[repr(C)]
pub struct QueueHeader {
    pub magic: [u8; 8],
    pub version: u32,
    pub capacity: u32,
    pub chunk_size: u64,
    pub gate: libc::sem_t,
    pub write_lock: libc::sem_t,
    pub read_lock: libc::sem_t,
}

const_assert!(offset_of!(QueueHeader, gate) % ShmSemaphore::ALIGN == 0);
const_assert!(offset_of!(QueueHeader, write_lock) % ShmLock::ALIGN == 0);
const_assert!(offset_of!(QueueHeader, read_lock) % ShmLock::ALIGN == 0);
const_assert!(size_of::<QueueHeader>() >= 24 + 3 * ShmSemaphore::SIZE);

pub(crate) struct Shared {
    pub gate: ShmSemaphore,
    pub write_lock: ShmLock,
    pub read_lock: ShmLock,
    pub reader: ChannelReader,
    pub writer: ChannelWriter,
    pub capacity: u32,
    pub chunk_size: usize,
    // Declared last: the semaphores above point into it.
    region: ShmRegion,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("region", &self.region)
            .field("capacity", &self.capacity)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl Shared {
    pub fn create(config: &QueueConfig) -> Result<Self, QueueError> {
        config.validate()?;
        let capacity = config.effective_capacity()?;

        let region = ShmRegion::create("spool-queue", size_of::<QueueHeader>())?;
        let header: *mut QueueHeader = region.get_ptr(0);

        // SAFETY: the region was just created, is zero-filled, sized for a
        // QueueHeader and not yet visible to any other process.
        let (gate, write_lock, read_lock) = unsafe {
            (&raw mut (*header).magic).write(QUEUE_MAGIC);
            (&raw mut (*header).version).write(QUEUE_VERSION);
            (&raw mut (*header).capacity).write(capacity);
            (&raw mut (*header).chunk_size).write(config.chunk_size as u64);
            (
                ShmSemaphore::init(&raw mut (*header).gate, capacity, capacity)?,
                ShmLock::init(&raw mut (*header).write_lock)?,
                ShmLock::init(&raw mut (*header).read_lock)?,
            )
        };

        let (reader, writer) = pipe()?;

        tracing::debug!(
            capacity,
            chunk_size = config.chunk_size,
            region_fd = region.as_raw_fd(),
            read_fd = reader.as_raw_fd(),
            write_fd = writer.as_raw_fd(),
            "created queue"
        );

        Ok(Self {
            gate,
            write_lock,
            read_lock,
            reader,
            writer,
            capacity,
            chunk_size: config.chunk_size,
            region,
        })
    }

    /// Adopt the descriptors named by `ticket`.
    ///
    /// # Safety
    ///
    /// The three descriptors must be open in this process and owned by
    /// nothing else; they are closed when the returned value is dropped.
    pub unsafe fn attach(ticket: &QueueTicket) -> Result<Self, QueueError> {
        // Take ownership first so every descriptor is closed on any error below.
        let region_fd = unsafe { owned(ticket.region_fd)? };
        let read_fd = unsafe { owned(ticket.read_fd)? };
        let write_fd = unsafe { owned(ticket.write_fd)? };

        require_fifo(&read_fd, "read")?;
        require_fifo(&write_fd, "write")?;

        let region = ShmRegion::attach_owned(region_fd)?;
        if region.len() < size_of::<QueueHeader>() {
            return Err(QueueError::Attach(format!(
                "region of {} bytes is smaller than a queue header",
                region.len()
            )));
        }
        let header: *mut QueueHeader = region.get_ptr(0);

        // SAFETY: bounds and alignment were checked by get_ptr; the fixed
        // fields are plain integers and valid for any bit pattern.
        let (magic, version, capacity, chunk_size) = unsafe {
            (
                (&raw const (*header).magic).read(),
                (&raw const (*header).version).read(),
                (&raw const (*header).capacity).read(),
                (&raw const (*header).chunk_size).read(),
            )
        };
        if magic != QUEUE_MAGIC {
            return Err(QueueError::Attach("region is not a queue".into()));
        }
        if version != QUEUE_VERSION {
            return Err(QueueError::Attach(format!(
                "queue layout version {} is not supported (expected {})",
                version, QUEUE_VERSION
            )));
        }
        let chunk_size = usize::try_from(chunk_size)
            .ok()
            .filter(|&size| (1..=MAX_FRAME_LEN).contains(&size))
            .ok_or_else(|| QueueError::Attach(format!("invalid chunk size {}", chunk_size)))?;
        if capacity == 0 {
            return Err(QueueError::Attach("invalid capacity 0".into()));
        }

        // SAFETY: magic and version match, so the creating process initialized
        // all three semaphores before handing out the region.
        let (gate, write_lock, read_lock) = unsafe {
            (
                ShmSemaphore::attach(&raw mut (*header).gate, capacity),
                ShmLock::attach(&raw mut (*header).write_lock),
                ShmLock::attach(&raw mut (*header).read_lock),
            )
        };

        tracing::debug!(capacity, chunk_size, ?ticket, "attached queue");

        Ok(Self {
            gate,
            write_lock,
            read_lock,
            reader: ChannelReader::from(read_fd),
            writer: ChannelWriter::from(write_fd),
            capacity,
            chunk_size,
            region,
        })
    }

    pub fn ticket(&self) -> QueueTicket {
        QueueTicket {
            region_fd: self.region.as_raw_fd(),
            read_fd: self.reader.as_raw_fd(),
            write_fd: self.writer.as_raw_fd(),
        }
    }

    /// Give back one unit of capacity. Failures are logged, not returned: by
    /// the time this runs the item has already been delivered or dropped.
    pub fn release_gate(&self) {
        if let Err(e) = self.gate.release() {
            tracing::warn!(error = %e, "failed to release queue capacity");
        }
    }
}

unsafe fn owned(fd: RawFd) -> Result<OwnedFd, QueueError> {
    if fd < 0 || unsafe { libc::fcntl(fd, libc::F_GETFD) } < 0 {
        return Err(QueueError::Attach(format!("descriptor {} is not open", fd)));
    }
    // SAFETY: open (checked above); exclusive ownership is the caller's contract.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn require_fifo(fd: &OwnedFd, end: &str) -> Result<(), QueueError> {
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd.as_raw_fd(), &mut stat) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    if stat.st_mode & libc::S_IFMT != libc::S_IFIFO {
        return Err(QueueError::Attach(format!(
            "{} descriptor {} is not a pipe",
            end,
            fd.as_raw_fd()
        )));
    }
    Ok(())
}
