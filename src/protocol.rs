//! JSON-RPC 2.0 wire envelopes.
//!
//! One JSON object per line. Requests carry an optional `id`: present for
//! calls (exactly one response expected), absent for notifications (no
//! response, ever). Responses carry either `error` or `result`; a void
//! success omits both. The `error`/`result` pair is modeled internally as
//! the [`Outcome`] sum type and only flattened to two optional fields at
//! the serialization boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Fixed JSON-RPC error codes preserved for wire compatibility.
pub mod codes {
    /// No handler is bound under the requested method name.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// The handler was found but failed (bad arguments or handler error).
    pub const HANDLER_ERROR: i64 = -1;
}

fn version() -> String {
    JSONRPC_VERSION.to_string()
}

/// A request envelope: a call when `id` is present, a notification otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "version")]
    pub jsonrpc: String,
    pub method: String,
    /// Positional arguments; omitted on the wire when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<Value>>,
    /// Client-chosen id, monotonically increasing per connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl Request {
    /// Build a call (expects exactly one response).
    pub fn call(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: version(),
            method: method.into(),
            params: if params.is_empty() { None } else { Some(params) },
            id: Some(id),
        }
    }

    /// Build a notification (fire-and-forget).
    pub fn notification(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: version(),
            method: method.into(),
            params: if params.is_empty() { None } else { Some(params) },
            id: None,
        }
    }

    /// True if this request expects a response.
    pub fn is_call(&self) -> bool {
        self.id.is_some()
    }

    /// Take the positional arguments, treating absent params as empty.
    pub fn take_params(&mut self) -> Vec<Value> {
        self.params.take().unwrap_or_default()
    }
}

/// The `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i64,
    pub message: String,
}

/// A response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(default = "version")]
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Decoded result of a response: success (possibly void) or failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// `result` field, absent for void-returning calls.
    Success(Option<Value>),
    /// `error` field.
    Failure(ErrorBody),
}

impl Response {
    /// Build a success response; `result` is omitted for void calls.
    pub fn success(id: u64, result: Option<Value>) -> Self {
        Self {
            jsonrpc: version(),
            id,
            error: None,
            result,
        }
    }

    /// Build a failure response with the given code and message.
    pub fn failure(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: version(),
            id,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
            result: None,
        }
    }

    /// Collapse the two optional wire fields into the sum type.
    /// `error` wins if both are present (a peer defect).
    pub fn into_outcome(self) -> Outcome {
        match self.error {
            Some(body) => Outcome::Failure(body),
            None => Outcome::Success(self.result),
        }
    }
}

/// Partial decode of a response used for correlation before the full parse.
#[derive(Debug, Deserialize)]
pub struct ResponseId {
    #[serde(default)]
    pub id: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_wire_shape() {
        let req = Request::call(3, "add", vec![json!(2), json!(3)]);
        let text = serde_json::to_string(&req).unwrap();
        assert_eq!(
            text,
            r#"{"jsonrpc":"2.0","method":"add","params":[2,3],"id":3}"#
        );
    }

    #[test]
    fn test_empty_params_are_omitted() {
        let req = Request::call(1, "ping", vec![]);
        let text = serde_json::to_string(&req).unwrap();
        assert!(!text.contains("params"));
    }

    #[test]
    fn test_notification_has_no_id() {
        let req = Request::notification("log", vec![json!("hi")]);
        assert!(!req.is_call());
        let text = serde_json::to_string(&req).unwrap();
        assert!(!text.contains("\"id\""));
    }

    #[test]
    fn test_void_success_omits_both_fields() {
        let resp = Response::success(9, None);
        let text = serde_json::to_string(&resp).unwrap();
        assert_eq!(text, r#"{"jsonrpc":"2.0","id":9}"#);
    }

    #[test]
    fn test_failure_wire_shape() {
        let resp = Response::failure(4, codes::METHOD_NOT_FOUND, "Unknown method 'nope'");
        let text = serde_json::to_string(&resp).unwrap();
        assert_eq!(
            text,
            r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32601,"message":"Unknown method 'nope'"}}"#
        );
    }

    #[test]
    fn test_outcome_mapping() {
        let ok = Response::success(1, Some(json!(5))).into_outcome();
        assert_eq!(ok, Outcome::Success(Some(json!(5))));

        let void = Response::success(1, None).into_outcome();
        assert_eq!(void, Outcome::Success(None));

        let err = Response::failure(1, codes::HANDLER_ERROR, "boom").into_outcome();
        assert_eq!(
            err,
            Outcome::Failure(ErrorBody {
                code: -1,
                message: "boom".into()
            })
        );
    }

    #[test]
    fn test_response_id_probe() {
        let probe: ResponseId =
            serde_json::from_slice(br#"{"jsonrpc":"2.0","id":17,"result":true}"#).unwrap();
        assert_eq!(probe.id, Some(17));

        // Requests decode too, with no id (used to spot misdirected frames).
        let probe: ResponseId =
            serde_json::from_slice(br#"{"jsonrpc":"2.0","method":"x"}"#).unwrap();
        assert_eq!(probe.id, None);
    }

    #[test]
    fn test_request_roundtrip_missing_fields() {
        let mut req: Request = serde_json::from_slice(br#"{"method":"tick"}"#).unwrap();
        assert_eq!(req.jsonrpc, JSONRPC_VERSION);
        assert!(!req.is_call());
        assert!(req.take_params().is_empty());
    }
}
