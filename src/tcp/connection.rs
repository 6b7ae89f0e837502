//! Tcp Connection: the read/write/dispatch pipeline shared by server- and
//! client-role sockets.
//!
//! State machine and field layout grounded on `tcp_connection.h`'s
//! `TcpConnection` — in/out buffers, a write-dones queue, a read-dones
//! map keyed by message id — with the dispatch step pulled out into an
//! injected `MessageHandler` so this module stays free of any dependency
//! on the RPC layer above it.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};

use crate::addr::NetAddr;
use crate::buffer::ByteBuffer;
use crate::codec::{decode, encode, Envelope};
use crate::reactor::selector::syscall;
use crate::reactor::{EventLoopHandle, FdEventPool, Interest};

/// Per spec.md §8 REDESIGN FLAGS: an unbounded `onRead` loop lets one
/// busy peer starve the rest of the loop. Capped at a fixed number of
/// reads per dispatch, each reserving at least `READ_CHUNK` bytes of
/// writable tail; remaining bytes are picked up on the next readiness
/// notification (edge-triggered epoll still reports it since the socket
/// buffer remains non-empty).
const MAX_READS_PER_TURN: usize = 32;
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    NotConnected,
    Connected,
    HalfClosing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Server,
    Client,
}

pub type ReadDone = Box<dyn FnOnce(Option<Envelope>) + Send>;
/// Fires once the message this was registered for either drained fully
/// to the kernel (`true`) or the connection was torn down before that
/// happened (`false`).
pub type WriteDone = Box<dyn FnOnce(bool) + Send>;

/// Invoked for each decoded frame that does not correlate with a pending
/// read, i.e. an inbound request rather than a response. The `rpc`
/// dispatcher is what actually installs one of these.
pub type MessageHandler = Arc<dyn Fn(&ConnectionHandle, Envelope) + Send + Sync>;

pub struct Connection {
    fd: RawFd,
    loop_handle: EventLoopHandle,
    local_addr: Option<NetAddr>,
    peer_addr: Option<NetAddr>,
    in_buffer: ByteBuffer,
    out_buffer: ByteBuffer,
    state: TcpState,
    conn_type: ConnectionType,
    write_dones: VecDeque<WriteDone>,
    pending_reads: HashMap<String, ReadDone>,
    message_handler: Option<MessageHandler>,
}

pub type ConnectionHandle = Arc<Mutex<Connection>>;

impl Connection {
    /// Adopts `fd` as a connection on `loop_handle`'s reactor, installs
    /// its read/write callbacks, and registers it for IN readiness.
    pub fn new(
        loop_handle: EventLoopHandle,
        fd: RawFd,
        buffer_size: usize,
        peer_addr: Option<NetAddr>,
        local_addr: Option<NetAddr>,
        conn_type: ConnectionType,
    ) -> ConnectionHandle {
        let conn = Connection {
            fd,
            loop_handle,
            local_addr,
            peer_addr,
            in_buffer: ByteBuffer::new(buffer_size),
            out_buffer: ByteBuffer::new(buffer_size),
            state: TcpState::NotConnected,
            conn_type,
            write_dones: VecDeque::new(),
            pending_reads: HashMap::new(),
            message_handler: None,
        };
        let handle: ConnectionHandle = Arc::new(Mutex::new(conn));
        Connection::install(&handle);
        handle
    }

    fn install(handle: &ConnectionHandle) {
        let (fd, loop_handle) = {
            let c = handle.lock().unwrap();
            (c.fd, c.loop_handle.clone())
        };
        let slot = FdEventPool::global().get_or_create(fd);
        let read_handle = handle.clone();
        let write_handle = handle.clone();
        {
            let mut s = slot.lock().unwrap();
            s.read_cb = Some(Box::new(move || Connection::on_read(&read_handle)));
            s.write_cb = Some(Box::new(move || Connection::on_write(&write_handle)));
        }
        loop_handle.add_fd_event(fd, Interest::READABLE);
    }

    pub fn set_message_handler(handle: &ConnectionHandle, f: MessageHandler) {
        handle.lock().unwrap().message_handler = Some(f);
    }

    pub fn set_state(handle: &ConnectionHandle, state: TcpState) {
        handle.lock().unwrap().state = state;
    }

    pub fn state(handle: &ConnectionHandle) -> TcpState {
        handle.lock().unwrap().state
    }

    pub fn fd(handle: &ConnectionHandle) -> RawFd {
        handle.lock().unwrap().fd
    }

    pub fn conn_type(handle: &ConnectionHandle) -> ConnectionType {
        handle.lock().unwrap().conn_type
    }

    pub fn local_addr(handle: &ConnectionHandle) -> Option<NetAddr> {
        handle.lock().unwrap().local_addr
    }

    pub fn peer_addr(handle: &ConnectionHandle) -> Option<NetAddr> {
        handle.lock().unwrap().peer_addr
    }

    pub fn set_local_addr(handle: &ConnectionHandle, addr: NetAddr) {
        handle.lock().unwrap().local_addr = Some(addr);
    }

    pub fn listen_read(handle: &ConnectionHandle) {
        let (fd, loop_handle, also_write) = {
            let c = handle.lock().unwrap();
            (c.fd, c.loop_handle.clone(), !c.out_buffer.is_empty())
        };
        let interest = if also_write { Interest::READABLE.add(Interest::WRITABLE) } else { Interest::READABLE };
        loop_handle.add_fd_event(fd, interest);
    }

    pub fn listen_write(handle: &ConnectionHandle) {
        let (fd, loop_handle) = {
            let c = handle.lock().unwrap();
            (c.fd, c.loop_handle.clone())
        };
        loop_handle.add_fd_event(fd, Interest::READABLE.add(Interest::WRITABLE));
    }

    /// Queues `envelope` for sending; `done` fires with `true` once the
    /// connection's entire outbound buffer (including this message) has
    /// drained to the kernel, in the order messages were queued (spec.md
    /// §5), or with `false` if the connection is torn down first.
    pub fn write_message(handle: &ConnectionHandle, envelope: &Envelope, done: Option<WriteDone>) {
        {
            let mut c = handle.lock().unwrap();
            let wire = encode(envelope);
            c.out_buffer.write(&wire);
            c.write_dones.push_back(done.unwrap_or_else(|| Box::new(|_| {})));
        }
        Connection::listen_write(handle);
    }

    /// Registers `done` to fire when a frame with `msg_id` as its
    /// `req_id` is decoded.
    pub fn read_message(handle: &ConnectionHandle, msg_id: impl Into<String>, done: ReadDone) {
        handle.lock().unwrap().pending_reads.insert(msg_id.into(), done);
    }

    fn on_read(handle: &ConnectionHandle) {
        let fd = handle.lock().unwrap().fd;
        for _ in 0..MAX_READS_PER_TURN {
            let mut c = handle.lock().unwrap();
            c.in_buffer.reserve(READ_CHUNK);
            let tail = c.in_buffer.writable_tail();
            let result = syscall!(read(fd, tail.as_mut_ptr() as *mut libc::c_void, tail.len()));
            match result {
                Ok(0) => {
                    drop(c);
                    Connection::clear(handle);
                    return;
                }
                Ok(n) => {
                    c.in_buffer.move_write_index(n as usize);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    drop(c);
                    Connection::clear(handle);
                    return;
                }
            }
        }
        Connection::execute(handle);
    }

    /// Decodes every complete frame now buffered and routes each one:
    /// responses to their waiting caller, everything else to the
    /// installed message handler.
    fn execute(handle: &ConnectionHandle) {
        loop {
            let decoded = {
                let mut c = handle.lock().unwrap();
                decode(&mut c.in_buffer)
            };
            let Some(envelope) = decoded else { break };

            let waiting = handle.lock().unwrap().pending_reads.remove(&envelope.req_id);
            if let Some(done) = waiting {
                done(Some(envelope));
                continue;
            }

            let handler = handle.lock().unwrap().message_handler.clone();
            match handler {
                Some(handler) => handler(handle, envelope),
                None => log::warn!("no message handler installed; dropping request {}", envelope.req_id),
            }
        }
    }

    fn on_write(handle: &ConnectionHandle) {
        loop {
            let (fd, remaining) = {
                let c = handle.lock().unwrap();
                (c.fd, c.out_buffer.readable())
            };
            if remaining == 0 {
                break;
            }
            let chunk = handle.lock().unwrap().out_buffer.peek().to_vec();
            match syscall!(write(fd, chunk.as_ptr() as *const libc::c_void, chunk.len())) {
                Ok(n) => {
                    handle.lock().unwrap().out_buffer.move_read_index(n as usize);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(_) => {
                    Connection::clear(handle);
                    return;
                }
            }
        }

        let dones: VecDeque<WriteDone> = std::mem::take(&mut handle.lock().unwrap().write_dones);
        for done in dones {
            done(true);
        }
        Connection::listen_read(handle);
    }

    /// Half-closes a still-open connection, per spec.md's `HalfClosing`
    /// state: stops accepting new writes but lets in-flight reads finish.
    pub fn shutdown(handle: &ConnectionHandle) {
        let (fd, was_connected) = {
            let mut c = handle.lock().unwrap();
            let was_connected = c.state == TcpState::Connected;
            if was_connected {
                c.state = TcpState::HalfClosing;
            }
            (c.fd, was_connected)
        };
        if was_connected {
            unsafe {
                libc::shutdown(fd, libc::SHUT_WR);
            }
        }
    }

    /// Tears the connection down: deregisters the fd, closes it, fails
    /// every still-pending read with `None`, and runs every still-queued
    /// write completion so a write-phase failure surfaces immediately
    /// instead of waiting on an unrelated timeout (spec.md §7's
    /// "connection refused/reset" row).
    pub fn clear(handle: &ConnectionHandle) {
        let (fd, loop_handle, pending, writes) = {
            let mut c = handle.lock().unwrap();
            if c.state == TcpState::Closed {
                return;
            }
            c.state = TcpState::Closed;
            (
                c.fd,
                c.loop_handle.clone(),
                std::mem::take(&mut c.pending_reads),
                std::mem::take(&mut c.write_dones),
            )
        };
        loop_handle.delete_fd_event(fd);
        unsafe {
            libc::close(fd);
        }
        for done in writes {
            done(false);
        }
        for (_, done) in pending {
            done(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::EventLoop;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;

    fn socketpair() -> (RawFd, RawFd) {
        let mut fds = [0i32; 2];
        let res = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0, fds.as_mut_ptr()) };
        assert_eq!(res, 0);
        (fds[0], fds[1])
    }

    /// A write queued but not yet drained when the connection is torn
    /// down must still have its completion fired, with `false`, instead
    /// of being silently dropped.
    #[test]
    fn clear_fires_pending_write_dones_with_failure() {
        let lp = EventLoop::new().unwrap();
        let loop_handle = lp.handle();
        let (a, b) = socketpair();

        let conn = Connection::new(loop_handle, a, 64, None, None, ConnectionType::Client);
        let fired = Arc::new(Mutex::new(None));
        let fired2 = fired.clone();
        Connection::write_message(
            &conn,
            &Envelope::new("00000000000000000001"),
            Some(Box::new(move |wrote| {
                *fired2.lock().unwrap() = Some(wrote);
            })),
        );

        Connection::clear(&conn);
        assert_eq!(*fired.lock().unwrap(), Some(false));
        unsafe {
            libc::close(b);
        }
    }

    #[test]
    fn decodes_a_request_and_routes_it_to_the_message_handler() {
        let mut lp = EventLoop::new().unwrap();
        let loop_handle = lp.handle();
        let (a, b) = socketpair();

        let conn = Connection::new(loop_handle.clone(), a, 64, None, None, ConnectionType::Server);
        let (tx, rx) = mpsc::channel();
        Connection::set_message_handler(
            &conn,
            Arc::new(move |_h, env| {
                tx.send(env.req_id.clone()).unwrap();
            }),
        );

        let request = Envelope::new("00000000000000000042");
        let wire = encode(&request);
        unsafe { libc::write(b, wire.as_ptr() as *const libc::c_void, wire.len()) };

        let stopper = loop_handle.clone();
        let got = Arc::new(AtomicBool::new(false));
        let got2 = got.clone();
        std::thread::spawn(move || {
            loop {
                if let Ok(id) = rx.recv_timeout(std::time::Duration::from_millis(500)) {
                    assert_eq!(id, "00000000000000000042");
                    got2.store(true, Ordering::SeqCst);
                    break;
                }
            }
            stopper.stop();
        });
        lp.run().unwrap();
        assert!(got.load(Ordering::SeqCst));
        unsafe {
            libc::close(b);
        }
    }
}
