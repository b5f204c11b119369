//! Line-delimited RPC transport.
//!
//! - `protocol.rs` - wire message types and parsing
//! - `connection.rs` - symmetric peer endpoint with request correlation,
//!   timeouts and per-connection ordering

mod connection;
mod protocol;

pub use connection::{RequestHandler, RpcConnection, REQUEST_TIMEOUT};
pub use protocol::{ErrorBody, Message, Request, Response};
