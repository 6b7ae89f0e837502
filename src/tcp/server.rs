//! Tcp Server: acceptor + main loop + worker pool.
//!
//! Grounded on spec.md §4.5's "Server" paragraph: a listening fd owned by
//! the main loop, an accept handler that drains the backlog in a tight
//! loop, and round-robin handoff of each accepted connection onto a
//! worker loop.

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::addr::NetAddr;
use crate::error::Result;
use crate::reactor::{EventLoop, EventLoopHandle, FdEventPool, Interest};
use crate::tcp::acceptor::Acceptor;
use crate::tcp::connection::{Connection, ConnectionHandle, ConnectionType, MessageHandler, TcpState};
use crate::worker::IoWorkerPool;

/// Initial buffer size for freshly accepted connections, per spec.md
/// §4.5.
const INITIAL_BUFFER_SIZE: usize = 128;

pub struct Server {
    main_loop: EventLoop,
    main_handle: EventLoopHandle,
    workers: IoWorkerPool,
    local_addr: NetAddr,
    connections: Arc<Mutex<HashMap<RawFd, ConnectionHandle>>>,
}

impl Server {
    pub fn bind(addr: NetAddr, worker_count: usize, message_handler: MessageHandler) -> Result<Server> {
        let acceptor = Acceptor::bind(addr)?;
        let local_addr = acceptor.local_addr();
        let main_loop = EventLoop::new()?;
        let main_handle = main_loop.handle();
        let workers = IoWorkerPool::new(worker_count);
        let connections: Arc<Mutex<HashMap<RawFd, ConnectionHandle>>> = Arc::new(Mutex::new(HashMap::new()));

        let worker_handles = workers.handles();
        let next = Arc::new(AtomicUsize::new(0));
        let acceptor = Arc::new(acceptor);
        let acceptor_fd = acceptor.as_raw_fd();
        let conns = connections.clone();

        let slot = FdEventPool::global().get_or_create(acceptor_fd);
        {
            let mut s = slot.lock().unwrap();
            s.read_cb = Some(Box::new(move || loop {
                let (fd, peer_addr) = acceptor.accept();
                if fd < 0 {
                    break;
                }
                let idx = next.fetch_add(1, Ordering::SeqCst) % worker_handles.len();
                let worker_handle = worker_handles[idx].clone();

                let conn = Connection::new(
                    worker_handle,
                    fd,
                    INITIAL_BUFFER_SIZE,
                    peer_addr,
                    None,
                    ConnectionType::Server,
                );
                Connection::set_message_handler(&conn, message_handler.clone());
                Connection::set_state(&conn, TcpState::Connected);
                conns.lock().unwrap().insert(fd, conn);
            }));
        }
        main_handle.add_fd_event(acceptor_fd, Interest::READABLE);

        Ok(Server { main_loop, main_handle, workers, local_addr, connections })
    }

    pub fn local_addr(&self) -> NetAddr {
        self.local_addr
    }

    pub fn handle(&self) -> EventLoopHandle {
        self.main_handle.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Releases every worker's start gate. Call before [`Server::run`].
    pub fn start(&self) {
        self.workers.start();
    }

    /// Runs the main (accept) loop until stopped. Blocks the calling
    /// thread; worker loops run independently on their own threads.
    pub fn run(&mut self) -> io::Result<()> {
        self.main_loop.run()
    }

    pub fn stop(&self) {
        self.main_handle.stop();
        self.workers.stop();
    }

    pub fn join(&mut self) {
        self.workers.join();
    }
}
