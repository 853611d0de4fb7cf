use std::ffi::CString;
use std::io;
use std::mem::{align_of, size_of};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::ptr::{self, NonNull};

/// An anonymous memory file mapped `MAP_SHARED`.
///
/// The backing descriptor comes from `memfd_create` with close-on-exec set.
/// A forked child inherits the mapping as-is; an exec'd child needs the
/// descriptor inherited (close-on-exec cleared in the child) and then maps it
/// again with [`ShmRegion::attach`].
pub struct ShmRegion {
    base: NonNull<u8>,
    len: usize,
    fd: OwnedFd,
}

// SAFETY: the mapping is plain shared memory; every structure placed in it is
// synchronized by the OS primitive or atomic that lives there.
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl std::fmt::Debug for ShmRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmRegion")
            .field("fd", &self.fd.as_raw_fd())
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl ShmRegion {
    /// Create a new zero-filled region of `len` bytes.
    ///
    /// `name` only shows up in `/proc/<pid>/fd` and has no other meaning.
    pub fn create(name: &str, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "region length must be non-zero",
            ));
        }
        let name = CString::new(name).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "region name contains a NUL byte")
        })?;

        let raw = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: memfd_create just returned this descriptor and nobody else owns it.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let size = libc::off_t::try_from(len).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "region length overflows off_t")
        })?;
        if unsafe { libc::ftruncate(fd.as_raw_fd(), size) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let base = map_shared(&fd, len)?;
        tracing::debug!(fd = fd.as_raw_fd(), len, "created shared region");

        Ok(Self { base, len, fd })
    }

    /// Map a region from an inherited descriptor.
    ///
    /// # Safety
    ///
    /// `fd` must be an open descriptor for a mappable file (normally the
    /// `fd()` of a region created by another process) and must not be owned
    /// by anything else in this process: the returned region closes it on drop.
    pub unsafe fn attach(fd: RawFd) -> io::Result<Self> {
        // SAFETY: ownership of the descriptor is transferred by the caller.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Self::attach_owned(fd)
    }

    /// Map a region from an owned descriptor.
    pub fn attach_owned(fd: OwnedFd) -> io::Result<Self> {
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd.as_raw_fd(), &mut stat) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let len = usize::try_from(stat.st_size).unwrap_or(0);
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "shared region is empty",
            ));
        }

        let base = map_shared(&fd, len)?;
        tracing::debug!(fd = fd.as_raw_fd(), len, "attached shared region");

        Ok(Self { base, len, fd })
    }

    /// Size of the mapping in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: empty regions cannot be created or attached.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base address of the mapping.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// The backing descriptor.
    #[inline]
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    /// Typed pointer to `offset`.
    ///
    /// Panics if a `T` at `offset` would not fit in the region or would be
    /// misaligned.
    pub fn get_ptr<T>(&self, offset: usize) -> *mut T {
        let end = offset
            .checked_add(size_of::<T>())
            .expect("region offset overflow");
        assert!(end <= self.len, "region too small for value at offset");

        // SAFETY: offset + size_of::<T>() is within the mapping (checked above).
        let ptr = unsafe { self.base.as_ptr().add(offset) };
        assert!(
            (ptr as usize).is_multiple_of(align_of::<T>()),
            "misaligned region offset"
        );
        ptr as *mut T
    }

    /// Typed shared reference to `offset`.
    ///
    /// # Safety
    ///
    /// The bytes at `offset` must hold a valid, initialized `T`, and the
    /// caller must not create a mutable alias to it.
    #[inline]
    pub unsafe fn get<T>(&self, offset: usize) -> &T {
        unsafe { &*self.get_ptr::<T>(offset) }
    }
}

impl AsRawFd for ShmRegion {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for ShmRegion {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        // SAFETY: base and len describe the mapping created in map_shared.
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

fn map_shared(fd: &OwnedFd, len: usize) -> io::Result<NonNull<u8>> {
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        )
    };

    if addr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    NonNull::new(addr as *mut u8)
        .ok_or_else(|| io::Error::other("mmap returned a null mapping"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    #[test]
    fn create_is_zero_filled() {
        init_tracing();
        let region = ShmRegion::create("zeroed", 4096).unwrap();
        assert_eq!(region.len(), 4096);
        let bytes = unsafe { std::slice::from_raw_parts(region.as_ptr(), region.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_length_is_rejected() {
        let err = ShmRegion::create("empty", 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn second_mapping_sees_writes() {
        init_tracing();
        let region = ShmRegion::create("shared", 128).unwrap();
        let other = ShmRegion::attach_owned(region.fd().try_clone_to_owned().unwrap()).unwrap();
        assert_eq!(other.len(), 128);
        assert_ne!(region.as_ptr(), other.as_ptr());

        let word: &AtomicU64 = unsafe { region.get(64) };
        word.store(0xfeed_beef, Ordering::Release);

        let seen: &AtomicU64 = unsafe { other.get(64) };
        assert_eq!(seen.load(Ordering::Acquire), 0xfeed_beef);
    }

    #[test]
    #[should_panic(expected = "region too small")]
    fn out_of_bounds_offset_panics() {
        let region = ShmRegion::create("bounds", 64).unwrap();
        let _ = region.get_ptr::<u64>(60);
    }

    #[test]
    #[should_panic(expected = "misaligned")]
    fn misaligned_offset_panics() {
        let region = ShmRegion::create("align", 64).unwrap();
        let _ = region.get_ptr::<u64>(3);
    }
}
