//! The RPC layer: per-call controller, method dispatch, and the client
//! side `call_method` orchestration, layered on top of [`crate::tcp`].

mod channel;
mod controller;
mod dispatcher;

pub use channel::{call_method, CallClosure};
pub use controller::RpcController;
pub use dispatcher::{Dispatcher, ServiceHandler};
