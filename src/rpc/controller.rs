//! Per-call RPC controller.
//!
//! Grounded on `rpc_controller.{h,cc}`: same field set and the same
//! reset defaults (`timeout = 1000ms`, everything else cleared), minus
//! the protobuf `RpcController` base class and its unused
//! `NotifyOnCancel` hook.

use std::time::Duration;

use crate::addr::NetAddr;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct RpcController {
    error_code: i32,
    error_info: String,
    msg_id: String,
    failed: bool,
    cancelled: bool,
    local_addr: Option<NetAddr>,
    peer_addr: Option<NetAddr>,
    timeout: Duration,
}

impl RpcController {
    pub fn new() -> RpcController {
        RpcController {
            error_code: 0,
            error_info: String::new(),
            msg_id: String::new(),
            failed: false,
            cancelled: false,
            local_addr: None,
            peer_addr: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Restores every field to its post-construction default, per
    /// spec.md §4.7.
    pub fn reset(&mut self) {
        *self = RpcController::new();
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn error_text(&self) -> &str {
        &self.error_info
    }

    pub fn start_cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn set_error(&mut self, error_code: i32, error_info: impl Into<String>) {
        self.error_code = error_code;
        self.error_info = error_info.into();
        self.failed = error_code != 0;
    }

    pub fn error_code(&self) -> i32 {
        self.error_code
    }

    pub fn set_msg_id(&mut self, msg_id: impl Into<String>) {
        self.msg_id = msg_id.into();
    }

    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }

    pub fn set_local_addr(&mut self, addr: Option<NetAddr>) {
        self.local_addr = addr;
    }

    pub fn set_peer_addr(&mut self, addr: Option<NetAddr>) {
        self.peer_addr = addr;
    }

    pub fn local_addr(&self) -> Option<NetAddr> {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<NetAddr> {
        self.peer_addr
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for RpcController {
    fn default() -> RpcController {
        RpcController::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_restores_defaults() {
        let mut c = RpcController::new();
        c.set_error(5, "timeout");
        c.set_msg_id("abc");
        c.start_cancel();
        c.set_timeout(Duration::from_millis(42));

        c.reset();

        assert_eq!(c.error_code(), 0);
        assert_eq!(c.error_text(), "");
        assert_eq!(c.msg_id(), "");
        assert!(!c.failed());
        assert!(!c.is_cancelled());
        assert_eq!(c.timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn set_error_marks_failed_only_for_nonzero_codes() {
        let mut c = RpcController::new();
        c.set_error(0, "");
        assert!(!c.failed());
        c.set_error(8, "not found");
        assert!(c.failed());
    }
}
