//! Cross-thread wakeup notifier backed by `eventfd(2)`.
//!
//! Copied in spirit (not verbatim) from the teacher's
//! `sys/unix/waker/eventfd.rs`: a non-blocking, close-on-exec eventfd,
//! 8-byte native-endian counter writes, reset-and-retry on `WouldBlock`.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};

use super::selector::syscall;

#[derive(Debug)]
pub struct Waker {
    fd: File,
}

impl Waker {
    pub fn new() -> io::Result<Waker> {
        let flags = libc::EFD_CLOEXEC | libc::EFD_NONBLOCK;
        let fd = syscall!(eventfd(0, flags))?;
        Ok(Waker {
            fd: unsafe { File::from_raw_fd(fd) },
        })
    }

    pub fn wake(&self) -> io::Result<()> {
        let buf: [u8; 8] = 1u64.to_ne_bytes();
        match (&self.fd).write(&buf) {
            Ok(_) => Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                self.reset()?;
                self.wake()
            }
            Err(err) => Err(err),
        }
    }

    /// Drains the counter. Must be called after each readiness
    /// notification (spec.md §4.2's "drain until EAGAIN" requirement
    /// applies equally to the waker fd).
    pub fn reset(&self) -> io::Result<()> {
        let mut buf: [u8; 8] = 0u64.to_ne_bytes();
        match (&self.fd).read(&mut buf) {
            Ok(_) => Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
