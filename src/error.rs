//! Error types for the transport, the backend contract and the daemon.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the RPC transport and the command dispatcher.
#[derive(Error, Debug)]
pub enum RpcError {
  #[error("Connection failed: {0}")]
  Connection(String),
  #[error("Method not found: {0}")]
  MethodNotFound(String),
  #[error("Invalid parameters: {0}")]
  InvalidParams(String),
  #[error("Remote error ({kind}): {message}")]
  Remote { kind: String, message: String },
  #[error("Request timeout")]
  Timeout,
  #[error("Malformed message: {0}")]
  Decode(String),
  #[error("Disconnected")]
  Disconnected,
}

impl RpcError {
  /// A handler-side failure forwarded to the caller with a machine-readable kind.
  pub fn remote(kind: &str, message: impl Into<String>) -> Self {
    RpcError::Remote {
      kind: kind.to_string(),
      message: message.into(),
    }
  }
}

/// Failures reported by the player backend collaborator.
#[derive(Error, Debug)]
pub enum BackendError {
  #[error("No such player: {0}")]
  UnknownPlayer(String),
  #[error("Invalid value: {0}")]
  InvalidValue(String),
  #[error("Backend failure: {0}")]
  Failed(String),
}

impl From<BackendError> for RpcError {
  fn from(err: BackendError) -> Self {
    let kind = match err {
      BackendError::UnknownPlayer(_) => "unknown-player",
      BackendError::InvalidValue(_) => "invalid-value",
      BackendError::Failed(_) => "backend-failed",
    };
    RpcError::remote(kind, err.to_string())
  }
}

/// Daemon lifecycle errors.
#[derive(Error, Debug)]
pub enum ServerError {
  #[error("A daemon instance is already running at {0}")]
  AlreadyRunning(PathBuf),
  #[error("Socket error: {0}")]
  Io(#[from] std::io::Error),
}
