//! The reactor's event loop: one per owning thread.
//!
//! Grounded on the shape of the teacher's `deprecated::EventLoop<H>` —
//! a task queue drained before every poll, a `Sender<M>` clone handed to
//! other threads, and a notify-fd used only to interrupt a blocked wait —
//! generalized away from the `Handler` trait towards per-fd boxed
//! callbacks stored in the [`super::fd_event`] pool, per spec.md §4.1.

use std::cell::Cell;
use std::collections::HashSet;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::Duration;

use super::fd_event::{FdEventPool, FdEventSlot};
use super::selector::{event_readiness, Event, Interest, Selector};
use super::waker::Waker;
use crate::error::{Result, RpcError};
use crate::timer::{TimerCallback, TimerHandle, TimerWheel};

/// Default `epoll_wait` timeout when the loop has nothing scheduled,
/// per spec.md §4.1.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub type Task = Box<dyn FnOnce() + Send>;

thread_local! {
    static HAS_LOOP: Cell<bool> = const { Cell::new(false) };
    static CURRENT_LOOP: Cell<*mut EventLoop> = const { Cell::new(std::ptr::null_mut()) };
}

/// A cheap, `Send + Clone` reference to a running [`EventLoop`], usable
/// from any thread to hand it work.
#[derive(Clone)]
pub struct EventLoopHandle {
    selector: Arc<Selector>,
    waker: Arc<Waker>,
    tasks: Arc<Mutex<Vec<Task>>>,
    registrations: Arc<Mutex<HashSet<RawFd>>>,
    run: Arc<AtomicBool>,
    thread_id: ThreadId,
}

impl EventLoopHandle {
    /// A stable identifier for the loop this handle points at, usable to
    /// tell two handles apart without comparing thread IDs.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.tasks) as usize
    }

    pub fn is_in_loop_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Queues `f` to run on the loop's thread. If `wake` and the caller
    /// is on a different thread, interrupts a blocked `epoll_wait` so the
    /// task runs promptly instead of waiting out the poll timeout.
    pub fn add_task(&self, f: impl FnOnce() + Send + 'static, wake: bool) {
        self.tasks.lock().unwrap().push(Box::new(f));
        if wake && !self.is_in_loop_thread() {
            let _ = self.waker.wake();
        }
    }

    pub fn wakeup(&self) {
        let _ = self.waker.wake();
    }

    pub fn stop(&self) {
        self.run.store(false, Ordering::SeqCst);
        self.wakeup();
    }

    /// Registers (or updates the interest mask of) `fd` with the reactor.
    /// Runs inline if already on the loop thread, otherwise trampolines
    /// through the task queue, per spec.md §4.1.
    pub fn add_fd_event(&self, fd: RawFd, interest: Interest) {
        let selector = self.selector.clone();
        let registrations = self.registrations.clone();
        let op = move || {
            let mut set = registrations.lock().unwrap();
            let result = if set.contains(&fd) {
                selector.reregister(fd, interest)
            } else {
                selector.register(fd, interest)
            };
            match result {
                Ok(()) => {
                    set.insert(fd);
                }
                Err(err) => log::error!("failed to register fd {fd} with reactor: {err}"),
            }
        };
        if self.is_in_loop_thread() {
            op();
        } else {
            self.add_task(op, true);
        }
    }

    pub fn delete_fd_event(&self, fd: RawFd) {
        let selector = self.selector.clone();
        let registrations = self.registrations.clone();
        let op = move || {
            let mut set = registrations.lock().unwrap();
            if set.remove(&fd) {
                let _ = selector.deregister(fd);
            }
            FdEventSlot::clear_callbacks(&FdEventPool::global().get_or_create(fd));
        };
        if self.is_in_loop_thread() {
            op();
        } else {
            self.add_task(op, true);
        }
    }
}

/// A single-threaded reactor: one epoll instance, one timer wheel, one
/// cross-thread task queue, woken by one eventfd.
///
/// Per spec.md §4.1, exactly one `EventLoop` may exist per OS thread;
/// constructing a second on a thread that already owns one is a fatal
/// programming error, not a recoverable one.
pub struct EventLoop {
    selector: Arc<Selector>,
    waker: Arc<Waker>,
    waker_fd: RawFd,
    timer: TimerWheel,
    timer_fd: RawFd,
    tasks: Arc<Mutex<Vec<Task>>>,
    registrations: Arc<Mutex<HashSet<RawFd>>>,
    events_buf: Vec<Event>,
    run: Arc<AtomicBool>,
    thread_id: ThreadId,
    looping: bool,
}

impl EventLoop {
    pub fn new() -> Result<EventLoop> {
        if HAS_LOOP.with(|c| c.get()) {
            return Err(RpcError::DuplicateEventLoop);
        }

        let selector = Selector::new()?;
        let waker = Waker::new()?;
        let timer = TimerWheel::new()?;
        let waker_fd = std::os::fd::AsRawFd::as_raw_fd(&waker);
        let timer_fd = timer.as_raw_fd();

        selector.register(waker_fd, Interest::READABLE)?;
        selector.register(timer_fd, Interest::READABLE)?;

        HAS_LOOP.with(|c| c.set(true));

        Ok(EventLoop {
            selector: Arc::new(selector),
            waker: Arc::new(waker),
            waker_fd,
            timer,
            timer_fd,
            tasks: Arc::new(Mutex::new(Vec::new())),
            registrations: Arc::new(Mutex::new(HashSet::new())),
            events_buf: Vec::with_capacity(128),
            run: Arc::new(AtomicBool::new(false)),
            thread_id: std::thread::current().id(),
            looping: false,
        })
    }

    pub fn handle(&self) -> EventLoopHandle {
        EventLoopHandle {
            selector: self.selector.clone(),
            waker: self.waker.clone(),
            tasks: self.tasks.clone(),
            registrations: self.registrations.clone(),
            run: self.run.clone(),
            thread_id: self.thread_id,
        }
    }

    pub fn is_in_loop_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn wakeup(&self) {
        let _ = self.waker.wake();
    }

    pub fn stop(&self) {
        self.run.store(false, Ordering::SeqCst);
        self.wakeup();
    }

    /// Runs `f` with mutable access to whichever `EventLoop` owns the
    /// calling thread, or does nothing if called off any loop thread.
    ///
    /// This is the only way code running inside a dispatched callback
    /// (which only ever sees a `&EventLoopHandle`, never the `EventLoop`
    /// itself) can reach the thread-confined timer wheel — mirroring
    /// spec.md §9's note that timer registration is deliberately not
    /// made thread-safe. Sound because every call to `f` happens while
    /// `run()` is on this thread's stack and `EventLoop` is single
    /// threaded by construction.
    pub fn with_current<R>(f: impl FnOnce(&mut EventLoop) -> R) -> Option<R> {
        let ptr = CURRENT_LOOP.with(|c| c.get());
        if ptr.is_null() {
            None
        } else {
            Some(f(unsafe { &mut *ptr }))
        }
    }

    /// Schedules a one-shot or repeating timer. Must be called from this
    /// loop's own thread (typically from inside a dispatched callback via
    /// [`EventLoop::with_current`]).
    pub fn add_timer(
        &mut self,
        delay: Duration,
        period: Option<Duration>,
        callback: TimerCallback,
    ) -> TimerHandle {
        self.timer.add_timer(delay, period, callback)
    }

    pub fn cancel_timer(&mut self, handle: &TimerHandle) -> bool {
        self.timer.cancel_timer(handle)
    }

    pub fn add_task(&self, f: impl FnOnce() + Send + 'static, wake: bool) {
        self.handle().add_task(f, wake);
    }

    pub fn add_fd_event(&self, fd: RawFd, interest: Interest) {
        self.handle().add_fd_event(fd, interest);
    }

    pub fn delete_fd_event(&self, fd: RawFd) {
        self.handle().delete_fd_event(fd);
    }

    /// Runs the loop until [`EventLoop::stop`] is called.
    pub fn run(&mut self) -> io::Result<()> {
        self.run.store(true, Ordering::SeqCst);
        self.looping = true;
        let self_ptr: *mut EventLoop = self;
        CURRENT_LOOP.with(|c| c.set(self_ptr));

        let result = (|| {
            while self.run.load(Ordering::SeqCst) {
                self.run_once(DEFAULT_TIMEOUT)?;
            }
            Ok(())
        })();

        CURRENT_LOOP.with(|c| c.set(std::ptr::null_mut()));
        self.looping = false;
        result
    }

    /// One iteration: drain and run pending tasks, poll for readiness,
    /// then enqueue callbacks for fired fds to run on the *next*
    /// iteration's task-drain step (spec.md §4.1).
    pub fn run_once(&mut self, timeout: Duration) -> io::Result<()> {
        let batch: Vec<Task> = {
            let mut q = self.tasks.lock().unwrap();
            std::mem::take(&mut *q)
        };
        for task in batch {
            task();
        }

        self.selector.select(&mut self.events_buf, Some(timeout))?;
        let ready: Vec<_> = self.events_buf.iter().map(event_readiness).collect();
        for r in ready {
            if r.fd == self.waker_fd {
                let _ = self.waker.reset();
                continue;
            }
            if r.fd == self.timer_fd {
                self.timer.fire_due();
                continue;
            }
            let handle = FdEventPool::global().get_or_create(r.fd);
            if r.readable || r.error_or_hup {
                let h = handle.clone();
                self.tasks.lock().unwrap().push(Box::new(move || FdEventSlot::run_read(&h)));
            }
            if r.writable {
                let h = handle.clone();
                self.tasks.lock().unwrap().push(Box::new(move || FdEventSlot::run_write(&h)));
            }
        }
        Ok(())
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        HAS_LOOP.with(|c| c.set(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn cross_thread_task_runs_on_loop_thread() {
        let mut lp = EventLoop::new().unwrap();
        let handle = lp.handle();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let loop_thread = lp.handle().thread_id;

        let stopper = lp.handle();
        thread::spawn(move || {
            handle.add_task(
                move || {
                    assert_eq!(std::thread::current().id(), loop_thread);
                    ran2.fetch_add(1, Ordering::SeqCst);
                },
                true,
            );
            stopper.stop();
        });

        lp.run().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_loop_on_same_thread_is_rejected() {
        let _first = EventLoop::new().unwrap();
        let second = EventLoop::new();
        assert!(matches!(second, Err(RpcError::DuplicateEventLoop)));
    }

    #[test]
    fn dropping_a_loop_frees_the_thread_for_a_new_one() {
        {
            let _lp = EventLoop::new().unwrap();
        }
        let _lp2 = EventLoop::new().unwrap();
    }
}
