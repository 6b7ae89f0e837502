//! rrpc: a lightweight epoll-reactor RPC framework for unary
//! request/response calls over TCP.
//!
//! The core is a single-threaded, per-OS-thread [`reactor::EventLoop`]
//! built on `epoll`. A [`tcp::Server`] owns one such loop for accepting
//! connections and hands each accepted socket off, round robin, to one
//! of a fixed [`worker::IoWorkerPool`]. A [`tcp::Client`] drives a
//! non-blocking connect on a caller-chosen loop. Both sides speak the
//! same length-delimited [`codec::Envelope`] framing; [`rpc::call_method`]
//! and [`rpc::Dispatcher`] sit on top to correlate requests with
//! responses by message id and route inbound requests to registered
//! [`rpc::ServiceHandler`]s.
//!
//! This crate emits diagnostics through the `log` facade only; wire in
//! `env_logger` or any other `log` backend to see them.

mod addr;
mod buffer;
mod codec;
pub mod config;
mod error;
mod msgid;
pub mod reactor;
pub mod rpc;
pub mod tcp;
mod timer;
pub mod worker;

pub use addr::NetAddr;
pub use buffer::ByteBuffer;
pub use codec::{decode, encode, Envelope};
pub use error::{ErrorCode, Result, RpcError};
pub use msgid::gen_msg_id;
