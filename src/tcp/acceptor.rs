//! Listening socket setup and accept loop.
//!
//! Grounded on the acceptor responsibilities spelled out for
//! `TcpServer`/`TcpAcceptor` in spec.md §4.5 — no single `rocket` source
//! file owns just this, since the original folds bind/listen/accept
//! directly into its server class.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::addr::NetAddr;
use crate::reactor::selector::syscall;

const LISTEN_BACKLOG: i32 = 1000;

pub struct Acceptor {
    fd: OwnedFd,
    local_addr: NetAddr,
}

impl Acceptor {
    pub fn bind(addr: NetAddr) -> io::Result<Acceptor> {
        let raw = syscall!(socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0))?;
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let one: libc::c_int = 1;
        syscall!(setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        ))?;

        let sockaddr = addr.to_sockaddr_in();
        syscall!(bind(
            fd.as_raw_fd(),
            &sockaddr as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ))?;

        syscall!(listen(fd.as_raw_fd(), LISTEN_BACKLOG))?;

        let mut bound: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        syscall!(getsockname(
            fd.as_raw_fd(),
            &mut bound as *mut libc::sockaddr_in as *mut libc::sockaddr,
            &mut len,
        ))?;
        let local_addr = NetAddr::from_sockaddr_in(&bound);

        Ok(Acceptor { fd, local_addr })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn local_addr(&self) -> NetAddr {
        self.local_addr
    }

    /// Accepts one pending connection. Returns `(-1, None)` — the
    /// sentinel pair from spec.md §4.5 — when `accept` fails, including
    /// the ordinary `EAGAIN` case once the backlog is drained.
    pub fn accept(&self) -> (RawFd, Option<NetAddr>) {
        let mut raw: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let fd = unsafe {
            libc::accept4(
                self.fd.as_raw_fd(),
                &mut raw as *mut libc::sockaddr_in as *mut libc::sockaddr,
                &mut len,
                libc::SOCK_NONBLOCK,
            )
        };
        if fd < 0 {
            return (-1, None);
        }
        (fd, Some(NetAddr::from_sockaddr_in(&raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_to_an_ephemeral_port() {
        let acceptor = Acceptor::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(acceptor.as_raw_fd() >= 0);
    }

    #[test]
    fn accept_on_empty_backlog_returns_sentinel() {
        let acceptor = Acceptor::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_eq!(acceptor.accept(), (-1, None));
    }
}
