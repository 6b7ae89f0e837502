//! TCP transport: acceptor, connection pipeline, server, and client.

pub mod acceptor;
pub mod client;
pub mod connection;
pub mod server;

pub use acceptor::Acceptor;
pub use client::{Client, ClientHandle, ConnectOutcome};
pub use connection::{Connection, ConnectionHandle, ConnectionType, MessageHandler, TcpState};
pub use server::Server;
