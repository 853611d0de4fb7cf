//! The byte channel: both ends of an OS pipe.
//!
//! Both ends are plain owned descriptors with close-on-exec set. They are
//! shared between processes by inheritance (`fork`, or `exec` after clearing
//! close-on-exec in the child).
//!
//! Reads are never buffered in user space. Several processes may read the same
//! pipe one message at a time, and read-ahead would consume bytes that belong
//! to the next reader's message.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// Create a new pipe.
pub fn pipe() -> io::Result<(ChannelReader, ChannelWriter)> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe2 succeeded, so both descriptors are open and ours alone.
    let (read_end, write_end) =
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    tracing::trace!(read_fd = fds[0], write_fd = fds[1], "created byte channel");
    Ok((ChannelReader::from(read_end), ChannelWriter::from(write_end)))
}

/// Read end of the byte channel.
#[derive(Debug)]
pub struct ChannelReader {
    file: File,
}

impl ChannelReader {
    /// Duplicate the descriptor (close-on-exec is kept).
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            file: self.file.try_clone()?,
        })
    }
}

impl From<OwnedFd> for ChannelReader {
    fn from(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
        }
    }
}

impl FromRawFd for ChannelReader {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Self::from(unsafe { OwnedFd::from_raw_fd(fd) })
    }
}

impl AsRawFd for ChannelReader {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsFd for ChannelReader {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.file).read(buf)
    }
}

impl Read for &ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.file).read(buf)
    }
}

/// Write end of the byte channel.
#[derive(Debug)]
pub struct ChannelWriter {
    file: File,
}

impl ChannelWriter {
    /// Duplicate the descriptor (close-on-exec is kept).
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            file: self.file.try_clone()?,
        })
    }

    /// Kernel buffer size of the pipe. A single write larger than this blocks
    /// until a reader drains the pipe.
    pub fn pipe_capacity(&self) -> io::Result<usize> {
        let size = unsafe { libc::fcntl(self.file.as_raw_fd(), libc::F_GETPIPE_SZ) };
        if size < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(size as usize)
    }
}

impl From<OwnedFd> for ChannelWriter {
    fn from(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
        }
    }
}

impl FromRawFd for ChannelWriter {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Self::from(unsafe { OwnedFd::from_raw_fd(fd) })
    }
}

impl AsRawFd for ChannelWriter {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsFd for ChannelWriter {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&self.file).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Write for &ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&self.file).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_flow_from_writer_to_reader() {
        let (mut reader, mut writer) = pipe().unwrap();
        writer.write_all(b"hello").unwrap();

        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn cloned_writer_shares_the_pipe() {
        let (reader, writer) = pipe().unwrap();
        let clone = writer.try_clone().unwrap();
        assert_ne!(clone.as_raw_fd(), writer.as_raw_fd());

        (&writer).write_all(b"ab").unwrap();
        (&clone).write_all(b"cd").unwrap();

        let mut buf = [0u8; 4];
        (&reader).read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abcd");
    }

    #[test]
    fn eof_after_all_writers_close() {
        let (mut reader, writer) = pipe().unwrap();
        let clone = writer.try_clone().unwrap();
        drop(writer);
        drop(clone);

        let mut buf = [0u8; 1];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn descriptors_are_close_on_exec() {
        let (reader, writer) = pipe().unwrap();
        for fd in [reader.as_raw_fd(), writer.as_raw_fd()] {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
            assert!(flags >= 0);
            assert_ne!(flags & libc::FD_CLOEXEC, 0);
        }
    }

    #[test]
    fn reports_pipe_capacity() {
        let (_reader, writer) = pipe().unwrap();
        assert!(writer.pipe_capacity().unwrap() >= 4096);
    }
}
