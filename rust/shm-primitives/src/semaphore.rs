use std::io;
use std::mem::{align_of, size_of};
use std::ptr::NonNull;
use std::time::Duration;

/// Largest value a POSIX semaphore can hold on this platform.
pub const SEM_VALUE_MAX: u32 = i32::MAX as u32;

/// A bounded, process-shared counting semaphore.
///
/// The `sem_t` lives inside a shared region (see [`crate::ShmRegion`]) and is
/// initialized with `pshared = 1`, so every process that maps the region can
/// acquire and release it. `max` bounds releases: releasing a semaphore whose
/// value already equals `max` is an error, matching the semantics of a bounded
/// semaphore.
///
/// Dropping a `ShmSemaphore` does not destroy the underlying `sem_t`; other
/// processes may still be using it. It goes away with the region.
pub struct ShmSemaphore {
    sem: NonNull<libc::sem_t>,
    max: u32,
}

// SAFETY: sem_t is designed for concurrent use from any thread or process.
unsafe impl Send for ShmSemaphore {}
unsafe impl Sync for ShmSemaphore {}

impl std::fmt::Debug for ShmSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmSemaphore")
            .field("value", &self.value().ok())
            .field("max", &self.max)
            .finish()
    }
}

impl ShmSemaphore {
    /// Bytes a semaphore occupies in a region.
    pub const SIZE: usize = size_of::<libc::sem_t>();
    /// Required alignment of a semaphore in a region.
    pub const ALIGN: usize = align_of::<libc::sem_t>();

    /// Initialize a new semaphore at `ptr` with `value` units available.
    ///
    /// # Safety
    ///
    /// `ptr` must point into a `MAP_SHARED` mapping, be valid for writes of a
    /// `sem_t`, stay mapped for as long as the returned value (or any process
    /// attached to it) is used, and not already hold a semaphore in use.
    pub unsafe fn init(ptr: *mut libc::sem_t, value: u32, max: u32) -> Result<Self, SemaphoreError> {
        if max == 0 || max > SEM_VALUE_MAX || value > max {
            return Err(SemaphoreError::InvalidValue { value, max });
        }
        let sem = NonNull::new(ptr).expect("semaphore pointer must be non-null");

        if unsafe { libc::sem_init(sem.as_ptr(), 1, value as libc::c_uint) } != 0 {
            return Err(SemaphoreError::Io(io::Error::last_os_error()));
        }

        Ok(Self { sem, max })
    }

    /// Attach to a semaphore that another process (or an earlier call) already
    /// initialized.
    ///
    /// # Safety
    ///
    /// `ptr` must point at a semaphore initialized by [`ShmSemaphore::init`]
    /// with the same `max`, inside a mapping that outlives the returned value.
    pub unsafe fn attach(ptr: *mut libc::sem_t, max: u32) -> Self {
        let sem = NonNull::new(ptr).expect("semaphore pointer must be non-null");
        Self { sem, max }
    }

    /// Acquire one unit.
    ///
    /// - `block == false`: take a unit if one is available right now; `timeout`
    ///   is ignored.
    /// - `block == true, timeout == None`: wait for as long as it takes.
    /// - `block == true, timeout == Some(d)`: wait until `d` has elapsed.
    ///
    /// Returns `Ok(false)` when no unit could be taken.
    pub fn acquire(&self, block: bool, timeout: Option<Duration>) -> Result<bool, SemaphoreError> {
        match (block, timeout) {
            (false, _) => self.try_acquire(),
            (true, None) => self.wait().map(|()| true),
            (true, Some(timeout)) => self.wait_timeout(timeout),
        }
    }

    /// Take a unit without blocking.
    pub fn try_acquire(&self) -> Result<bool, SemaphoreError> {
        loop {
            if unsafe { libc::sem_trywait(self.sem.as_ptr()) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(SemaphoreError::Io(err)),
            }
        }
    }

    fn wait(&self) -> Result<(), SemaphoreError> {
        loop {
            if unsafe { libc::sem_wait(self.sem.as_ptr()) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(SemaphoreError::Io(err));
            }
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> Result<bool, SemaphoreError> {
        // sem_timedwait takes an absolute CLOCK_REALTIME deadline; computing it
        // once keeps EINTR retries from extending the wait.
        let deadline = realtime_deadline(timeout).map_err(SemaphoreError::Io)?;
        loop {
            if unsafe { libc::sem_timedwait(self.sem.as_ptr(), &deadline) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(SemaphoreError::Io(err)),
            }
        }
    }

    /// Return one unit.
    ///
    /// The bound check reads the value before posting, so two processes
    /// releasing concurrently at `max - 1` can both pass it.
    pub fn release(&self) -> Result<(), SemaphoreError> {
        if self.value()? >= self.max {
            return Err(SemaphoreError::Overreleased { max: self.max });
        }

        if unsafe { libc::sem_post(self.sem.as_ptr()) } != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EOVERFLOW) {
                return Err(SemaphoreError::Overreleased { max: self.max });
            }
            return Err(SemaphoreError::Io(err));
        }
        Ok(())
    }

    /// Current number of available units.
    ///
    /// Only a snapshot; other processes may change it immediately.
    pub fn value(&self) -> Result<u32, SemaphoreError> {
        let mut value: libc::c_int = 0;
        if unsafe { libc::sem_getvalue(self.sem.as_ptr(), &mut value) } != 0 {
            return Err(SemaphoreError::Io(io::Error::last_os_error()));
        }
        // Some platforms report waiters as a negative count.
        Ok(value.max(0) as u32)
    }

    /// Upper bound of the semaphore's value.
    #[inline]
    pub fn max(&self) -> u32 {
        self.max
    }
}

fn realtime_deadline(timeout: Duration) -> io::Result<libc::timespec> {
    let mut now: libc::timespec = unsafe { std::mem::zeroed() };
    if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let secs = timeout.as_secs().min(libc::time_t::MAX as u64) as libc::time_t;
    let mut deadline = now;
    deadline.tv_sec = now.tv_sec.saturating_add(secs);
    deadline.tv_nsec = now.tv_nsec + timeout.subsec_nanos() as libc::c_long;
    if deadline.tv_nsec >= 1_000_000_000 {
        deadline.tv_sec = deadline.tv_sec.saturating_add(1);
        deadline.tv_nsec -= 1_000_000_000;
    }
    Ok(deadline)
}

/// Errors from semaphore operations.
#[derive(Debug)]
pub enum SemaphoreError {
    /// The OS call failed.
    Io(io::Error),
    /// Released more times than it was acquired.
    Overreleased { max: u32 },
    /// Initial value or bound out of range.
    InvalidValue { value: u32, max: u32 },
}

impl std::fmt::Display for SemaphoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "semaphore I/O error: {}", e),
            Self::Overreleased { max } => {
                write!(f, "semaphore released too many times (bound {})", max)
            }
            Self::InvalidValue { value, max } => write!(
                f,
                "invalid semaphore value {} for bound {} (bound must be 1..={})",
                value, max, SEM_VALUE_MAX
            ),
        }
    }
}

impl std::error::Error for SemaphoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}
