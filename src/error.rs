//! Error types.
//!
//! Raw I/O on fds surfaces as `std::io::Error`, matching the reactor's
//! syscall wrappers. The RPC layer additionally needs a small set of
//! stable, wire-exposed error codes (spec.md §6) that don't fit
//! `io::Error` — those live in [`ErrorCode`].

use std::fmt;

use thiserror::Error;

/// Stable, wire-exposed RPC error codes.
///
/// These values are carried in the envelope's `err_code` field and must
/// not be renumbered once a peer depends on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// No error; the call completed normally.
    Ok = 0,
    PeerClosed = 1,
    FailedConnect = 2,
    FailedSerialize = 3,
    FailedDeserialize = 4,
    RpcCallTimeout = 5,
    RpcChannelInit = 6,
    ParseServiceName = 7,
    ServiceNotFound = 8,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<ErrorCode> {
        use ErrorCode::*;
        Some(match code {
            0 => Ok,
            1 => PeerClosed,
            2 => FailedConnect,
            3 => FailedSerialize,
            4 => FailedDeserialize,
            5 => RpcCallTimeout,
            6 => RpcChannelInit,
            7 => ParseServiceName,
            8 => ServiceNotFound,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Ok => "ok",
            ErrorCode::PeerClosed => "peer closed",
            ErrorCode::FailedConnect => "failed to connect",
            ErrorCode::FailedSerialize => "failed to serialize request",
            ErrorCode::FailedDeserialize => "failed to deserialize payload",
            ErrorCode::RpcCallTimeout => "rpc call timed out",
            ErrorCode::RpcChannelInit => "rpc channel not initialized",
            ErrorCode::ParseServiceName => "could not parse service name",
            ErrorCode::ServiceNotFound => "service or method not found",
        };
        f.write_str(s)
    }
}

/// Errors raised by parts of the stack that are not wire-exposed: framing
/// bugs, address validation, and reactor setup failures that are fatal at
/// startup (spec.md §7).
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid network address: {0}")]
    InvalidAddr(String),

    #[error("frame too short or malformed")]
    MalformedFrame,

    #[error("event loop already exists on this thread")]
    DuplicateEventLoop,
}

pub type Result<T> = std::result::Result<T, RpcError>;
