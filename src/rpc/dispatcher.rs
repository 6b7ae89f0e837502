//! Rpc Dispatcher: routes a decoded request envelope to a registered
//! service handler and builds the response envelope.
//!
//! Grounded on spec.md §4.9. `rocket`'s dispatcher drives protobuf
//! `Service`/`MethodDescriptor` reflection; this crate has no IDL
//! compiler in its dependency stack, so [`ServiceHandler`] takes and
//! returns raw payload bytes and callers own their own encoding.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::addr::NetAddr;
use crate::codec::Envelope;
use crate::error::ErrorCode;
use crate::rpc::controller::RpcController;
use crate::tcp::connection::{Connection, ConnectionHandle, MessageHandler};

/// One service's method handlers, keyed by method name (the part of
/// `method_name` after the first `.`).
pub trait ServiceHandler: Send + Sync {
    fn service_name(&self) -> &str;

    /// Invokes `method_name` synchronously with `payload`, returning the
    /// serialized response body, or `ErrorCode::ServiceNotFound` if this
    /// service has no such method.
    fn handle(
        &self,
        method_name: &str,
        payload: &[u8],
        controller: &RpcController,
    ) -> Result<Vec<u8>, ErrorCode>;
}

pub struct Dispatcher {
    services: Mutex<HashMap<String, Arc<dyn ServiceHandler>>>,
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        Dispatcher { services: Mutex::new(HashMap::new()) }
    }

    /// The process-wide registry, per spec.md §5 ("RPC dispatcher
    /// registry is process-wide").
    pub fn global() -> &'static Dispatcher {
        static REGISTRY: OnceLock<Dispatcher> = OnceLock::new();
        REGISTRY.get_or_init(Dispatcher::new)
    }

    pub fn register(&self, handler: Arc<dyn ServiceHandler>) {
        self.services.lock().unwrap().insert(handler.service_name().to_string(), handler);
    }

    /// Builds the response envelope for `request`, per spec.md §4.9's
    /// step sequence.
    pub fn dispatch(&self, request: &Envelope, local_addr: Option<NetAddr>, peer_addr: Option<NetAddr>) -> Envelope {
        let mut response = Envelope::new(request.req_id.clone());
        response.method_name = request.method_name.clone();

        let Some((service_name, method_name)) = request.method_name.split_once('.') else {
            response.err_code = ErrorCode::ParseServiceName.code();
            response.err_info = ErrorCode::ParseServiceName.to_string();
            return response;
        };

        let handler = self.services.lock().unwrap().get(service_name).cloned();
        let Some(handler) = handler else {
            response.err_code = ErrorCode::ServiceNotFound.code();
            response.err_info = ErrorCode::ServiceNotFound.to_string();
            return response;
        };

        let mut controller = RpcController::new();
        controller.set_msg_id(request.req_id.clone());
        controller.set_local_addr(local_addr);
        controller.set_peer_addr(peer_addr);

        match handler.handle(method_name, &request.payload, &controller) {
            Ok(payload) => {
                response.payload = payload;
                response.err_code = 0;
            }
            Err(code) => {
                response.err_code = code.code();
                response.err_info = code.to_string();
            }
        }
        response
    }

    /// Wraps `self` as a [`MessageHandler`] a [`crate::tcp::Server`] can
    /// install on every accepted connection: dispatches the inbound
    /// request and writes the response straight back.
    pub fn handler(self: Arc<Dispatcher>) -> MessageHandler {
        Arc::new(move |conn: &ConnectionHandle, request: Envelope| {
            let local_addr = Connection::local_addr(conn);
            let peer_addr = Connection::peer_addr(conn);
            let response = self.dispatch(&request, local_addr, peer_addr);
            Connection::write_message(conn, &response, None);
        })
    }
}

impl Default for Dispatcher {
    fn default() -> Dispatcher {
        Dispatcher::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoService;
    impl ServiceHandler for EchoService {
        fn service_name(&self) -> &str {
            "Echo"
        }
        fn handle(&self, method_name: &str, payload: &[u8], _controller: &RpcController) -> Result<Vec<u8>, ErrorCode> {
            match method_name {
                "echo" => Ok(payload.to_vec()),
                _ => Err(ErrorCode::ServiceNotFound),
            }
        }
    }

    fn request(method_name: &str) -> Envelope {
        let mut env = Envelope::new("00000000000000000001");
        env.method_name = method_name.to_string();
        env.payload = b"hi".to_vec();
        env
    }

    #[test]
    fn dispatches_to_the_registered_service() {
        let dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(EchoService));
        let response = dispatcher.dispatch(&request("Echo.echo"), None, None);
        assert_eq!(response.err_code, 0);
        assert_eq!(response.payload, b"hi");
        assert_eq!(response.req_id, "00000000000000000001");
    }

    #[test]
    fn unknown_service_reports_service_not_found() {
        let dispatcher = Dispatcher::new();
        let response = dispatcher.dispatch(&request("Nope.echo"), None, None);
        assert_eq!(response.err_code, ErrorCode::ServiceNotFound.code());
    }

    #[test]
    fn unknown_method_on_known_service_reports_service_not_found() {
        let dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(EchoService));
        let response = dispatcher.dispatch(&request("Echo.unknown"), None, None);
        assert_eq!(response.err_code, ErrorCode::ServiceNotFound.code());
    }

    #[test]
    fn missing_dot_reports_parse_service_name() {
        let dispatcher = Dispatcher::new();
        let response = dispatcher.dispatch(&request("NoDotHere"), None, None);
        assert_eq!(response.err_code, ErrorCode::ParseServiceName.code());
    }
}
