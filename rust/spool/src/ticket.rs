use std::os::fd::RawFd;
use std::os::unix::process::CommandExt;
use std::process::Command;

use crate::error::QueueError;

/// Prefix of the environment variable carrying a ticket to a child process.
pub const ENV_PREFIX: &str = "SPOOL_QUEUE_";

/// The descriptors a process needs to attach to an existing queue.
///
/// A forked child inherits the queue directly and needs no ticket. For a
/// child started with [`Command`], hand the ticket over with
/// [`apply_to_command`](Self::apply_to_command) and pick it up on the other
/// side with [`from_env`](Self::from_env) and [`crate::Queue::attach`].
///
/// The descriptors stay owned by the queue the ticket came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueTicket {
    pub region_fd: RawFd,
    pub read_fd: RawFd,
    pub write_fd: RawFd,
}

impl QueueTicket {
    /// Environment variable used for a queue called `name`.
    ///
    /// `name` is upper-cased; anything other than ASCII letters and digits
    /// becomes `_`.
    pub fn env_var(name: &str) -> String {
        let suffix: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", ENV_PREFIX, suffix)
    }

    /// `"<region>,<read>,<write>"`.
    pub fn to_env_value(&self) -> String {
        format!("{},{},{}", self.region_fd, self.read_fd, self.write_fd)
    }

    /// Parse the output of [`to_env_value`](Self::to_env_value).
    pub fn parse(value: &str) -> Result<Self, QueueError> {
        let invalid = || QueueError::Attach(format!("malformed queue ticket {:?}", value));

        let mut fds = value.trim().split(',').map(|part| {
            part.trim()
                .parse::<RawFd>()
                .ok()
                .filter(|&fd| fd >= 0)
                .ok_or_else(invalid)
        });
        let region_fd = fds.next().ok_or_else(invalid)??;
        let read_fd = fds.next().ok_or_else(invalid)??;
        let write_fd = fds.next().ok_or_else(invalid)??;
        if fds.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            region_fd,
            read_fd,
            write_fd,
        })
    }

    /// The ticket for queue `name` passed down by the parent, if any.
    pub fn from_env(name: &str) -> Result<Option<Self>, QueueError> {
        let var = Self::env_var(name);
        match std::env::var(&var) {
            Ok(value) => Self::parse(&value).map(Some),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => Err(QueueError::Attach(format!(
                "{} is not valid unicode",
                var
            ))),
        }
    }

    /// Make a child spawned from `cmd` inherit this queue as `name`.
    ///
    /// Sets the ticket variable and clears close-on-exec on the three
    /// descriptors in the child only, after fork and before exec. The
    /// parent's descriptors keep close-on-exec, so unrelated children do not
    /// inherit the queue.
    pub fn apply_to_command<'a>(&self, cmd: &'a mut Command, name: &str) -> &'a mut Command {
        let fds = [self.region_fd, self.read_fd, self.write_fd];
        cmd.env(Self::env_var(name), self.to_env_value());
        // SAFETY: the hook only calls fcntl, which is async-signal-safe, and
        // allocates nothing.
        unsafe {
            cmd.pre_exec(move || {
                for fd in fds {
                    clear_cloexec(fd)?;
                }
                Ok(())
            })
        }
    }
}

fn clear_cloexec(fd: RawFd) -> std::io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
