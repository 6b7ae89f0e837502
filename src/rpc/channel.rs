//! Rpc Channel: drives one `call_method` invocation end to end.
//!
//! Grounded on `rpc_channel.cc`'s `CallMethod` — connect, write, read,
//! correlate by `msg_id`, one-shot timeout timer — with its
//! `shared_from_this` self-keepalive replaced by ordinary `Arc` clones
//! captured in each continuation closure (spec.md §9's "Connection-owned
//! callbacks" note), and with one deliberate correction: the original
//! skips the closure entirely when the response carries a nonzero
//! `err_code`. spec.md §8's "at-most-once call completion" property
//! requires the closure to fire exactly once regardless of outcome, so
//! this implementation always invokes it once, with the error surfaced
//! through the controller.

use std::sync::{Arc, Mutex};

use crate::addr::NetAddr;
use crate::codec::Envelope;
use crate::error::ErrorCode;
use crate::msgid::gen_msg_id;
use crate::reactor::{EventLoop, EventLoopHandle};
use crate::rpc::controller::RpcController;
use crate::tcp::client::{Client, ConnectOutcome};
use crate::tcp::connection::{Connection, ConnectionHandle};
use crate::timer::TimerHandle;

pub type CallClosure = Box<dyn FnOnce(Arc<Mutex<RpcController>>, Option<Vec<u8>>) + Send>;

struct ChannelState {
    controller: Arc<Mutex<RpcController>>,
    closure: Mutex<Option<CallClosure>>,
    timer_handle: Mutex<Option<TimerHandle>>,
}

impl ChannelState {
    /// Runs the closure if it has not already fired, then drops it —
    /// the `Option` being emptied is the "consumed-once token" that
    /// guarantees at-most-once delivery even if both the timeout and a
    /// late response race to finish the call.
    fn finish(state: &Arc<ChannelState>, payload: Option<Vec<u8>>) {
        if let Some(closure) = state.closure.lock().unwrap().take() {
            closure(state.controller.clone(), payload);
        }
    }

    fn on_timeout(state: &Arc<ChannelState>) {
        let mut controller = state.controller.lock().unwrap();
        if controller.is_cancelled() {
            return;
        }
        controller.start_cancel();
        let timeout = controller.timeout();
        controller.set_error(ErrorCode::RpcCallTimeout.code(), format!("rpc call timeout after {timeout:?}"));
        drop(controller);
        ChannelState::finish(state, None);
    }

    fn on_connect_failed(state: &Arc<ChannelState>, code: ErrorCode) {
        if let Some(timer) = state.timer_handle.lock().unwrap().take() {
            EventLoop::with_current(|lp| lp.cancel_timer(&timer));
        }
        if state.controller.lock().unwrap().is_cancelled() {
            return;
        }
        state.controller.lock().unwrap().set_error(code.code(), code.to_string());
        ChannelState::finish(state, None);
    }

    fn on_response(state: &Arc<ChannelState>, received: Option<Envelope>) {
        if let Some(timer) = state.timer_handle.lock().unwrap().take() {
            EventLoop::with_current(|lp| lp.cancel_timer(&timer));
        }
        if state.controller.lock().unwrap().is_cancelled() {
            return;
        }
        match received {
            Some(env) => {
                if env.err_code != 0 {
                    state.controller.lock().unwrap().set_error(env.err_code, env.err_info);
                }
                ChannelState::finish(state, Some(env.payload));
            }
            None => {
                state.controller.lock().unwrap().set_error(ErrorCode::PeerClosed.code(), ErrorCode::PeerClosed.to_string());
                ChannelState::finish(state, None);
            }
        }
    }

    fn on_connected(state: &Arc<ChannelState>, conn: ConnectionHandle, request: Envelope) {
        let msg_id = request.req_id.clone();
        let read_state = state.clone();
        let conn_for_read = conn.clone();
        Connection::write_message(
            &conn,
            &request,
            Some(Box::new(move |wrote| {
                if wrote {
                    Connection::read_message(
                        &conn_for_read,
                        msg_id,
                        Box::new(move |received| ChannelState::on_response(&read_state, received)),
                    );
                } else {
                    // The connection was torn down before the request
                    // drained; there is nothing left to read a response
                    // from.
                    ChannelState::on_response(&read_state, None);
                }
            })),
        );
    }
}

/// Calls `method_full_name` (`"Service.method"`) against `target`,
/// delivering the outcome to `closure` exactly once, per spec.md §4.7.
///
/// `request_payload` is already serialized by the caller — this crate
/// carries no IDL compiler, so request/response encoding is the caller's
/// responsibility rather than a concrete `Message` type's, unlike the
/// protobuf-backed original. Must be called from the thread owning
/// `loop_handle`'s loop, so the timeout timer can be armed.
pub fn call_method(
    loop_handle: EventLoopHandle,
    target: NetAddr,
    method_full_name: impl Into<String>,
    controller: Arc<Mutex<RpcController>>,
    request_payload: Vec<u8>,
    closure: CallClosure,
) {
    {
        let mut c = controller.lock().unwrap();
        if c.msg_id().is_empty() {
            let id = gen_msg_id();
            c.set_msg_id(id);
        }
    }
    let msg_id = controller.lock().unwrap().msg_id().to_string();

    let mut request = Envelope::new(msg_id);
    request.method_name = method_full_name.into();
    request.payload = request_payload;

    let state = Arc::new(ChannelState {
        controller: controller.clone(),
        closure: Mutex::new(Some(closure)),
        timer_handle: Mutex::new(None),
    });

    let timeout = controller.lock().unwrap().timeout();
    let timer_state = state.clone();
    let armed = EventLoop::with_current(|lp| {
        lp.add_timer(timeout, None, Box::new(move || ChannelState::on_timeout(&timer_state)))
    });
    match armed {
        Some(handle) => *state.timer_handle.lock().unwrap() = Some(handle),
        None => log::error!("call_method invoked off its loop's thread; timeout will not fire"),
    }

    let client = match Client::new(loop_handle.clone(), target, 128) {
        Ok(client) => client,
        Err(err) => {
            log::error!("failed to create client socket for rpc call: {err}");
            ChannelState::on_connect_failed(&state, ErrorCode::FailedConnect);
            return;
        }
    };

    let connect_state = state.clone();
    Client::connect(
        &client,
        Box::new(move |outcome| match outcome {
            ConnectOutcome::Connected(conn) => ChannelState::on_connected(&connect_state, conn, request),
            ConnectOutcome::Failed(code) => ChannelState::on_connect_failed(&connect_state, code),
        }),
    );
}
