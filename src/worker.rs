//! I/O Worker Pool: a fixed set of threads, each hosting its own
//! [`EventLoop`], that accepted connections are distributed across.
//!
//! The two-gate handshake (construct, then wait to start) mirrors the
//! teacher's `EventLoop::channel()` pattern of handing a `Sender` back to
//! the spawning thread before the loop itself starts pumping — generalized
//! here into an explicit construct/start rendezvous per spec.md §4.5, so a
//! `Server` can finish wiring all workers before any of them begins
//! accepting work.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::reactor::{EventLoop, EventLoopHandle};

struct ConstructGate {
    handle: Mutex<Option<EventLoopHandle>>,
    cv: Condvar,
}

struct StartGate {
    go: Mutex<bool>,
    cv: Condvar,
}

/// One worker thread and the loop it owns.
pub struct IoWorker {
    handle: EventLoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl IoWorker {
    fn spawn(start_gate: Arc<StartGate>) -> IoWorker {
        let construct_gate = Arc::new(ConstructGate { handle: Mutex::new(None), cv: Condvar::new() });
        let cg = construct_gate.clone();
        let sg = start_gate;

        let thread = thread::Builder::new()
            .name("io-worker".to_string())
            .spawn(move || {
                let mut event_loop = match EventLoop::new() {
                    Ok(lp) => lp,
                    Err(err) => {
                        log::error!("worker failed to construct its event loop: {err}");
                        return;
                    }
                };

                {
                    let mut slot = cg.handle.lock().unwrap();
                    *slot = Some(event_loop.handle());
                    cg.cv.notify_one();
                }

                {
                    let mut go = sg.go.lock().unwrap();
                    while !*go {
                        go = sg.cv.wait(go).unwrap();
                    }
                }

                if let Err(err) = event_loop.run() {
                    log::error!("worker event loop exited with error: {err}");
                }
            })
            .expect("failed to spawn io worker thread");

        let handle = {
            let mut slot = construct_gate.handle.lock().unwrap();
            while slot.is_none() {
                slot = construct_gate.cv.wait(slot).unwrap();
            }
            slot.take().unwrap()
        };

        IoWorker { handle, thread: Some(thread) }
    }

    pub fn handle(&self) -> &EventLoopHandle {
        &self.handle
    }
}

/// Fixed-size pool of [`IoWorker`]s with round-robin assignment, per
/// spec.md §4.5.
pub struct IoWorkerPool {
    workers: Vec<IoWorker>,
    start_gate: Arc<StartGate>,
    next: AtomicUsize,
}

impl IoWorkerPool {
    pub const DEFAULT_WORKER_COUNT: usize = 2;

    pub fn new(worker_count: usize) -> IoWorkerPool {
        let start_gate = Arc::new(StartGate { go: Mutex::new(false), cv: Condvar::new() });
        let count = worker_count.max(1);
        let workers = (0..count).map(|_| IoWorker::spawn(start_gate.clone())).collect();
        IoWorkerPool { workers, start_gate, next: AtomicUsize::new(0) }
    }

    /// Releases every worker's start gate, letting their loops begin
    /// running.
    pub fn start(&self) {
        let mut go = self.start_gate.go.lock().unwrap();
        *go = true;
        self.start_gate.cv.notify_all();
    }

    /// Stops every worker's loop. Does not join; call [`IoWorkerPool::join`]
    /// afterwards to wait for threads to exit.
    pub fn stop(&self) {
        for worker in &self.workers {
            worker.handle.stop();
        }
    }

    /// Returns the next worker's handle, advancing the round-robin
    /// pointer and wrapping at the end.
    pub fn next(&self) -> EventLoopHandle {
        let i = self.next.fetch_add(1, Ordering::SeqCst) % self.workers.len();
        self.workers[i].handle().clone()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Clones of every worker's handle, in pool order. Useful to callers
    /// (e.g. a `Server`'s accept loop) that want to do their own
    /// round-robin bookkeeping rather than going through [`IoWorkerPool::next`].
    pub fn handles(&self) -> Vec<EventLoopHandle> {
        self.workers.iter().map(|w| w.handle().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn join(&mut self) {
        for worker in &mut self.workers {
            if let Some(t) = worker.thread.take() {
                let _ = t.join();
            }
        }
    }
}

impl Default for IoWorkerPool {
    fn default() -> IoWorkerPool {
        IoWorkerPool::new(IoWorkerPool::DEFAULT_WORKER_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robins_across_workers() {
        let mut pool = IoWorkerPool::new(3);
        pool.start();
        let a = pool.next();
        let b = pool.next();
        let c = pool.next();
        let d = pool.next();
        assert_ne!(a.id(), b.id());
        assert_ne!(b.id(), c.id());
        assert_eq!(a.id(), d.id(), "round-robin should wrap back to the first worker");
        pool.stop();
        pool.join();
    }

    #[test]
    fn default_pool_has_two_workers() {
        let mut pool = IoWorkerPool::default();
        assert_eq!(pool.len(), 2);
        pool.start();
        pool.stop();
        pool.join();
    }
}
