//! Wire types for the line-delimited RPC protocol.
//!
//! One JSON object per line, two shapes: a request (with an `id` when a
//! response is expected, without one for fire-and-forget notifications) and a
//! response carrying either `result` or `error` for a previously seen id.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RpcError;

/// A request or notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
  /// Correlation id; absent for notifications, which are never answered.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<u64>,
  pub method: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub args: Vec<Value>,
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub kwargs: Map<String, Value>,
}

impl Request {
  pub fn new(id: u64, method: &str, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
    Self {
      id: Some(id),
      method: method.to_string(),
      args,
      kwargs,
    }
  }

  pub fn notification(method: &str, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
    Self {
      id: None,
      method: method.to_string(),
      args,
      kwargs,
    }
  }

  /// Build the server-to-client event push: a notification with
  /// `method = "event"` whose kwargs carry the payload plus the event name.
  pub fn event(name: &str, mut payload: Map<String, Value>) -> Self {
    payload.insert("event".to_string(), Value::String(name.to_string()));
    Self::notification("event", Vec::new(), payload)
  }

  pub fn is_notification(&self) -> bool {
    self.id.is_none()
  }
}

/// Error payload of a failed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
  #[serde(rename = "type")]
  pub kind: String,
  pub message: String,
}

impl ErrorBody {
  /// Map a wire error back to the matching caller-side error.
  pub fn into_error(self) -> RpcError {
    match self.kind.as_str() {
      "method-not-found" => RpcError::MethodNotFound(self.message),
      "invalid-params" => RpcError::InvalidParams(self.message),
      _ => RpcError::Remote {
        kind: self.kind,
        message: self.message,
      },
    }
  }
}

impl From<&RpcError> for ErrorBody {
  fn from(err: &RpcError) -> Self {
    let (kind, message) = match err {
      RpcError::MethodNotFound(m) => ("method-not-found", m.clone()),
      RpcError::InvalidParams(m) => ("invalid-params", m.clone()),
      RpcError::Remote { kind, message } => {
        return ErrorBody {
          kind: kind.clone(),
          message: message.clone(),
        }
      }
      other => ("internal", other.to_string()),
    };
    ErrorBody {
      kind: kind.to_string(),
      message,
    }
  }
}

/// The reply to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
  pub id: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<ErrorBody>,
}

impl Response {
  pub fn result(id: u64, value: Value) -> Self {
    Self {
      id,
      result: Some(value),
      error: None,
    }
  }

  pub fn error(id: u64, err: &RpcError) -> Self {
    Self {
      id,
      result: None,
      error: Some(ErrorBody::from(err)),
    }
  }

  /// Resolve into the caller-visible outcome.
  pub fn into_result(self) -> Result<Value, RpcError> {
    match self.error {
      Some(body) => Err(body.into_error()),
      None => Ok(self.result.unwrap_or(Value::Null)),
    }
  }
}

/// One parsed wire line.
#[derive(Debug, Clone)]
pub enum Message {
  Request(Request),
  Response(Response),
}

impl Message {
  /// Parse a line: anything with a `method` is a request, anything with a
  /// `result` or `error` is a response, everything else is malformed.
  pub fn parse(line: &str) -> Result<Self, RpcError> {
    let value: Value =
      serde_json::from_str(line).map_err(|e| RpcError::Decode(e.to_string()))?;
    let object = value
      .as_object()
      .ok_or_else(|| RpcError::Decode("message is not an object".to_string()))?;

    if object.contains_key("method") {
      serde_json::from_value(value)
        .map(Message::Request)
        .map_err(|e| RpcError::Decode(e.to_string()))
    } else if object.contains_key("result") || object.contains_key("error") {
      serde_json::from_value(value)
        .map(Message::Response)
        .map_err(|e| RpcError::Decode(e.to_string()))
    } else {
      Err(RpcError::Decode(
        "message is neither a request nor a response".to_string(),
      ))
    }
  }
}
