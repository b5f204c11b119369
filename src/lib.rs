//! Multiplexes a set of concurrent media players behind a single "current
//! player" and serves it over a local line-delimited RPC socket.
//!
//! - `backend` - the player backend contract and shared player types
//! - `bridge` - channel plumbing between the backend thread and the daemon
//! - `arbiter` - decides which player is current as players come and go
//! - `rpc` - wire protocol and the symmetric connection endpoint
//! - `dispatch` - maps RPC methods onto the arbiter and the backend
//! - `fanout` - pushes events to subscribed connections
//! - `server` - the daemon: socket lifecycle and the accept loop
//! - `client` - typed client handle for tooling built on the daemon

mod arbiter;
mod backend;
mod bridge;
mod client;
mod dispatch;
mod error;
mod fanout;
mod rpc;
mod server;

pub use backend::{BackendEvent, LoopStatus, PlaybackStatus, PlayerBackend, PlayerCommand};
pub use bridge::EventSink;
pub use client::{Client, Event};
pub use error::{BackendError, RpcError, ServerError};
pub use rpc::REQUEST_TIMEOUT;
pub use server::{default_socket_path, Daemon};
