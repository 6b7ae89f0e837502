//! Tcp Client: non-blocking connect state machine.
//!
//! Grounded on spec.md §4.6. No single `rocket` file matches this one to
//! one — the original folds client connect logic into `TcpClient`, but
//! this crate keeps the state machine here and the request/response
//! correlation in the `rpc` layer above it.

use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};

use crate::addr::NetAddr;
use crate::error::ErrorCode;
use crate::reactor::selector::syscall;
use crate::reactor::{EventLoopHandle, FdEventPool, Interest};
use crate::tcp::connection::{Connection, ConnectionHandle, ConnectionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    NotConnected,
    Connected,
    Failed,
}

pub enum ConnectOutcome {
    Connected(ConnectionHandle),
    Failed(ErrorCode),
}

pub type ConnectDone = Box<dyn FnOnce(ConnectOutcome) + Send>;

/// Intended to be driven entirely from its owning loop's thread, per
/// spec.md §5's "loop thread" rule — there is no internal locking beyond
/// what sharing the fd with the reactor's callback storage requires.
pub struct Client {
    fd: RawFd,
    addr: NetAddr,
    loop_handle: EventLoopHandle,
    state: TcpState,
    buffer_size: usize,
}

pub type ClientHandle = Arc<Mutex<Client>>;

fn new_nonblocking_socket() -> std::io::Result<RawFd> {
    let raw = syscall!(socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0))?;
    Ok(raw)
}

impl Client {
    pub fn new(loop_handle: EventLoopHandle, addr: NetAddr, buffer_size: usize) -> std::io::Result<ClientHandle> {
        let fd = new_nonblocking_socket()?;
        Ok(Arc::new(Mutex::new(Client { fd, addr, loop_handle, state: TcpState::NotConnected, buffer_size })))
    }

    pub fn state(handle: &ClientHandle) -> TcpState {
        handle.lock().unwrap().state
    }

    /// Initiates (or continues) a non-blocking connect, invoking `done`
    /// exactly once: immediately if the kernel completes the connect
    /// synchronously or rejects it outright, otherwise once OUT
    /// readiness reports completion.
    pub fn connect(handle: &ClientHandle, done: ConnectDone) {
        let (fd, sockaddr) = {
            let c = handle.lock().unwrap();
            (c.fd, c.addr.to_sockaddr_in())
        };

        let res = unsafe {
            libc::connect(
                fd,
                &sockaddr as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };

        if res == 0 {
            Client::finish_connected(handle, done);
            return;
        }

        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        if errno == libc::EINPROGRESS {
            let loop_handle = handle.lock().unwrap().loop_handle.clone();
            let slot = FdEventPool::global().get_or_create(fd);
            let retry_handle = handle.clone();
            let done = Arc::new(Mutex::new(Some(done)));
            {
                let mut s = slot.lock().unwrap();
                let done2 = done.clone();
                s.write_cb = Some(Box::new(move || {
                    if let Some(done) = done2.lock().unwrap().take() {
                        Client::complete_in_progress_connect(&retry_handle, done);
                    }
                }));
            }
            loop_handle.add_fd_event(fd, Interest::WRITABLE);
            return;
        }

        handle.lock().unwrap().state = TcpState::Failed;
        let outcome = if errno == libc::ECONNREFUSED {
            ConnectOutcome::Failed(ErrorCode::PeerClosed)
        } else {
            ConnectOutcome::Failed(ErrorCode::FailedConnect)
        };
        done(outcome);
    }

    fn complete_in_progress_connect(handle: &ClientHandle, done: ConnectDone) {
        let (fd, sockaddr) = {
            let c = handle.lock().unwrap();
            (c.fd, c.addr.to_sockaddr_in())
        };
        let res = unsafe {
            libc::connect(
                fd,
                &sockaddr as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        let succeeded = res == 0 || (res == -1 && errno == libc::EISCONN);

        let loop_handle = handle.lock().unwrap().loop_handle.clone();
        loop_handle.delete_fd_event(fd);

        if succeeded {
            // Leave the now-connected fd in place; finish_connected
            // rebuilds the Connection on top of it directly.
            Client::finish_connected(handle, done);
            return;
        }

        handle.lock().unwrap().state = TcpState::Failed;
        let outcome = if errno == libc::ECONNREFUSED {
            ConnectOutcome::Failed(ErrorCode::PeerClosed)
        } else {
            ConnectOutcome::Failed(ErrorCode::FailedConnect)
        };

        // Recreate the socket so a caller may retry connect() with a
        // fresh fd, per spec.md §4.6.
        if let Ok(fresh) = new_nonblocking_socket() {
            handle.lock().unwrap().fd = fresh;
        }
        done(outcome);
    }

    fn finish_connected(handle: &ClientHandle, done: ConnectDone) {
        let (fd, loop_handle, peer_addr, buffer_size) = {
            let mut c = handle.lock().unwrap();
            c.state = TcpState::Connected;
            (c.fd, c.loop_handle.clone(), c.addr, c.buffer_size)
        };

        let mut local: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let local_addr = unsafe {
            if libc::getsockname(fd, &mut local as *mut libc::sockaddr_in as *mut libc::sockaddr, &mut len) == 0 {
                Some(NetAddr::from_sockaddr_in(&local))
            } else {
                None
            }
        };

        let conn = Connection::new(loop_handle, fd, buffer_size, Some(peer_addr), local_addr, ConnectionType::Client);
        done(ConnectOutcome::Connected(conn));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::EventLoop;
    use crate::tcp::acceptor::Acceptor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;

    #[test]
    fn connects_to_a_listening_socket() {
        let acceptor = Acceptor::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = acceptor.local_addr();

        let mut lp = EventLoop::new().unwrap();
        let loop_handle = lp.handle();

        let acceptor_fd = acceptor.as_raw_fd();
        let slot = FdEventPool::global().get_or_create(acceptor_fd);
        slot.lock().unwrap().read_cb = Some(Box::new(move || {
            acceptor.accept();
        }));
        loop_handle.add_fd_event(acceptor_fd, Interest::READABLE);

        let client = Client::new(loop_handle.clone(), addr, 64).unwrap();
        let (tx, rx) = mpsc::channel();
        let stopper = loop_handle.clone();
        Client::connect(
            &client,
            Box::new(move |outcome| {
                tx.send(matches!(outcome, ConnectOutcome::Connected(_))).unwrap();
                stopper.stop();
            }),
        );

        lp.run().unwrap();
        let ok = rx.recv_timeout(std::time::Duration::from_millis(500)).unwrap();
        assert!(ok);
        assert_eq!(Client::state(&client), TcpState::Connected);
    }

    #[test]
    fn connect_refused_reports_peer_closed() {
        // Bind then immediately drop to free the port without anyone
        // listening on it.
        let addr = {
            let acceptor = Acceptor::bind("127.0.0.1:0".parse().unwrap()).unwrap();
            acceptor.local_addr()
        };

        let mut lp = EventLoop::new().unwrap();
        let loop_handle = lp.handle();
        let client = Client::new(loop_handle.clone(), addr, 64).unwrap();

        let failed = Arc::new(AtomicBool::new(false));
        let failed2 = failed.clone();
        let stopper = loop_handle.clone();
        Client::connect(
            &client,
            Box::new(move |outcome| {
                if let ConnectOutcome::Failed(ErrorCode::PeerClosed) = outcome {
                    failed2.store(true, Ordering::SeqCst);
                }
                stopper.stop();
            }),
        );

        lp.run().unwrap();
        assert!(failed.load(Ordering::SeqCst));
    }
}
