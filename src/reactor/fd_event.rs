//! Fd Event and its process-wide pool.
//!
//! Per spec.md §9 ("Design Notes"): re-architected from the original's
//! index-by-fd table of heap objects into an arena keyed by fd with
//! interior mutability on entries, allocated lazily on first use and
//! never reclaimed — fds are small integers and the pool's peak is
//! bounded by the process fd limit.

use std::os::fd::RawFd;
use std::sync::{Arc, Mutex, OnceLock};

pub type Callback = Box<dyn FnMut() + Send>;

/// One registered fd's callbacks.
///
/// Lifecycle per spec.md §3: created when a socket is adopted, destroyed
/// (callbacks dropped, slot left in place) when the connection owning it
/// is torn down. The desired epoll interest mask is not stored here — it
/// is owned by the `EventLoop`'s registration bookkeeping, since a slot
/// may briefly outlive deregistration while a callback invocation still
/// holds a clone of the handle.
pub struct FdEventSlot {
    pub fd: RawFd,
    pub read_cb: Option<Callback>,
    pub write_cb: Option<Callback>,
}

impl FdEventSlot {
    fn new(fd: RawFd) -> FdEventSlot {
        FdEventSlot { fd, read_cb: None, write_cb: None }
    }

    /// Runs `read_cb` without holding the slot's lock across the call, so
    /// the callback may itself register other fds or re-borrow this slot
    /// (e.g. to update its own write callback) without deadlocking.
    pub fn run_read(handle: &FdEventHandle) {
        run_cb(handle, |s| &mut s.read_cb);
    }

    pub fn run_write(handle: &FdEventHandle) {
        run_cb(handle, |s| &mut s.write_cb);
    }

    pub fn clear_callbacks(handle: &FdEventHandle) {
        let mut slot = handle.lock().unwrap();
        slot.read_cb = None;
        slot.write_cb = None;
    }
}

fn run_cb(handle: &FdEventHandle, select: impl Fn(&mut FdEventSlot) -> &mut Option<Callback>) {
    let taken = {
        let mut slot = handle.lock().unwrap();
        select(&mut slot).take()
    };
    if let Some(mut cb) = taken {
        cb();
        let mut slot = handle.lock().unwrap();
        if select(&mut slot).is_none() {
            *select(&mut slot) = Some(cb);
        }
    }
}

/// A shared handle to a registered fd's callbacks.
pub type FdEventHandle = Arc<Mutex<FdEventSlot>>;

/// Process-wide arena of [`FdEventHandle`]s keyed by fd number.
pub struct FdEventPool {
    entries: Mutex<Vec<Option<FdEventHandle>>>,
}

impl FdEventPool {
    fn new() -> FdEventPool {
        FdEventPool { entries: Mutex::new(Vec::new()) }
    }

    /// The process-wide pool, per spec.md §5 ("Fd-Event pool is
    /// process-wide and guarded by a mutex").
    pub fn global() -> &'static FdEventPool {
        static POOL: OnceLock<FdEventPool> = OnceLock::new();
        POOL.get_or_init(FdEventPool::new)
    }

    /// Returns the handle for `fd`, allocating a fresh one (and growing
    /// the backing arena 1.5x if needed) on first use.
    pub fn get_or_create(&self, fd: RawFd) -> FdEventHandle {
        let idx = fd as usize;
        let mut entries = self.entries.lock().unwrap();
        if idx >= entries.len() {
            let new_len = ((idx + 1) as f64 * 1.5).ceil() as usize;
            entries.resize_with(new_len.max(idx + 1), || None);
        }
        entries[idx]
            .get_or_insert_with(|| Arc::new(Mutex::new(FdEventSlot::new(fd))))
            .clone()
    }
}

impl Default for FdEventPool {
    fn default() -> FdEventPool {
        FdEventPool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_same_handle_for_same_fd() {
        let pool = FdEventPool::new();
        let a = pool.get_or_create(3);
        let b = pool.get_or_create(3);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn grows_for_large_fd_numbers() {
        let pool = FdEventPool::new();
        let handle = pool.get_or_create(500);
        assert_eq!(handle.lock().unwrap().fd, 500);
    }
}
