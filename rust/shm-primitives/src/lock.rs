use crate::semaphore::{SemaphoreError, ShmSemaphore};

/// A process-shared lock.
///
/// This is a binary [`ShmSemaphore`] (value 1, bound 1). Unlike a
/// `pthread_mutex_t` it has no owner, so a guard may be dropped on any thread,
/// and a process that dies while holding it leaves it locked.
#[derive(Debug)]
pub struct ShmLock {
    sem: ShmSemaphore,
}

impl ShmLock {
    /// Bytes a lock occupies in a region.
    pub const SIZE: usize = ShmSemaphore::SIZE;
    /// Required alignment of a lock in a region.
    pub const ALIGN: usize = ShmSemaphore::ALIGN;

    /// Initialize a new, unlocked lock at `ptr`.
    ///
    /// # Safety
    ///
    /// Same contract as [`ShmSemaphore::init`].
    pub unsafe fn init(ptr: *mut libc::sem_t) -> Result<Self, SemaphoreError> {
        let sem = unsafe { ShmSemaphore::init(ptr, 1, 1)? };
        Ok(Self { sem })
    }

    /// Attach to a lock initialized elsewhere.
    ///
    /// # Safety
    ///
    /// Same contract as [`ShmSemaphore::attach`].
    pub unsafe fn attach(ptr: *mut libc::sem_t) -> Self {
        Self {
            sem: unsafe { ShmSemaphore::attach(ptr, 1) },
        }
    }

    /// Block until the lock is held.
    pub fn lock(&self) -> Result<ShmLockGuard<'_>, SemaphoreError> {
        self.sem.acquire(true, None)?;
        Ok(ShmLockGuard { lock: self })
    }

    /// Take the lock if it is free right now.
    pub fn try_lock(&self) -> Result<Option<ShmLockGuard<'_>>, SemaphoreError> {
        if self.sem.try_acquire()? {
            Ok(Some(ShmLockGuard { lock: self }))
        } else {
            Ok(None)
        }
    }

    /// Whether some thread or process currently holds the lock (snapshot).
    pub fn is_locked(&self) -> Result<bool, SemaphoreError> {
        Ok(self.sem.value()? == 0)
    }
}

/// Releases the [`ShmLock`] when dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ShmLockGuard<'a> {
    lock: &'a ShmLock,
}

impl Drop for ShmLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.sem.release() {
            tracing::error!(error = %e, "failed to release shared lock");
        }
    }
}
