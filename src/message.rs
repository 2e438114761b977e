//! JSON-RPC 2.0 message model.
//!
//! A [`Message`] is one of three wire shapes: a request (has `id` and
//! `method`), a notification (has `method` only), or a response (has `id`
//! and either `result` or `error`). Conversion to and from the JSON
//! envelope is explicit ([`Message::to_json`] / [`Message::from_json`])
//! so that the presence of a `result` field can be distinguished from a
//! `result` that happens to be `null`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::RpcError;

/// Reserved notification used to cancel an in-flight request by id.
pub const CANCEL_METHOD: &str = "$/cancelRequest";

/// The id of a request, echoed back in its response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Number(i64),
    String(String),
}

impl fmt::Display for MessageId {
    /// Numbers render bare, strings quoted, matching the protocol's
    /// convention for ids embedded in error messages.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Number(n) => write!(f, "{n}"),
            MessageId::String(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<i64> for MessageId {
    fn from(n: i64) -> Self {
        MessageId::Number(n)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId::String(s.to_string())
    }
}

/// The `params` member of a request or notification: positional or named.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonParams {
    Array(Vec<Value>),
    Object(Map<String, Value>),
}

impl JsonParams {
    /// Array length or object entry count.
    pub fn len(&self) -> usize {
        match self {
            JsonParams::Array(items) => items.len(),
            JsonParams::Object(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_value(self) -> Value {
        match self {
            JsonParams::Array(items) => Value::Array(items),
            JsonParams::Object(map) => Value::Object(map),
        }
    }
}

/// Params of the [`CANCEL_METHOD`] notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelParams {
    pub id: MessageId,
}

/// Wire-stable JSON-RPC error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerNotInitialized,
    RequestCancelled,
    ContentModified,
}

impl ResponseErrorCode {
    pub const fn code(self) -> i32 {
        match self {
            ResponseErrorCode::ParseError => -32700,
            ResponseErrorCode::InvalidRequest => -32600,
            ResponseErrorCode::MethodNotFound => -32601,
            ResponseErrorCode::InvalidParams => -32602,
            ResponseErrorCode::InternalError => -32603,
            ResponseErrorCode::ServerNotInitialized => -32002,
            ResponseErrorCode::RequestCancelled => -32800,
            ResponseErrorCode::ContentModified => -32801,
        }
    }
}

impl From<ResponseErrorCode> for i32 {
    fn from(code: ResponseErrorCode) -> i32 {
        code.code()
    }
}

/// The `error` member of an error response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn new(code: ResponseErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ResponseErrorCode::MethodNotFound,
            format!("Method not found: {method}"),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ResponseErrorCode::InvalidParams, message)
    }

    pub fn internal_error() -> Self {
        Self::new(ResponseErrorCode::InternalError, "Internal error.")
    }

    /// The error sent when an inbound request's handler observed
    /// cancellation. String ids render quoted, numeric ids bare.
    pub fn request_cancelled(id: &MessageId, method: &str) -> Self {
        Self::new(
            ResponseErrorCode::RequestCancelled,
            format!("The request (id: {id}, method: '{method}') has been cancelled"),
        )
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// A request: the peer expects exactly one response for `id`.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestMessage {
    pub id: MessageId,
    pub method: String,
    pub params: Option<JsonParams>,
}

/// A notification: fire-and-forget, no response.
#[derive(Clone, Debug, PartialEq)]
pub struct NotificationMessage {
    pub method: String,
    pub params: Option<JsonParams>,
}

/// A response to a previously received request. The id of an error
/// response may be null when the offending request's id could not be
/// parsed.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseMessage {
    Result { id: MessageId, result: Value },
    Error { id: Option<MessageId>, error: ResponseError },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Request(RequestMessage),
    Notification(NotificationMessage),
    Response(ResponseMessage),
}

impl Message {
    /// Build the JSON-RPC 2.0 envelope for this message.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("jsonrpc".to_string(), Value::String("2.0".to_string()));
        match self {
            Message::Request(request) => {
                map.insert("id".to_string(), id_to_json(&request.id));
                map.insert("method".to_string(), Value::String(request.method.clone()));
                if let Some(params) = &request.params {
                    map.insert("params".to_string(), params.clone().into_value());
                }
            }
            Message::Notification(notification) => {
                map.insert(
                    "method".to_string(),
                    Value::String(notification.method.clone()),
                );
                if let Some(params) = &notification.params {
                    map.insert("params".to_string(), params.clone().into_value());
                }
            }
            Message::Response(ResponseMessage::Result { id, result }) => {
                map.insert("id".to_string(), id_to_json(id));
                map.insert("result".to_string(), result.clone());
            }
            Message::Response(ResponseMessage::Error { id, error }) => {
                let id = match id {
                    Some(id) => id_to_json(id),
                    None => Value::Null,
                };
                map.insert("id".to_string(), id);
                map.insert(
                    "error".to_string(),
                    serde_json::to_value(error).unwrap_or(Value::Null),
                );
            }
        }
        Value::Object(map)
    }

    /// Classify a parsed JSON value as a request, notification, or
    /// response. Anything else is an `InvalidRequest` issue.
    pub fn from_json(value: Value) -> Result<Message, RpcError> {
        let Value::Object(mut map) = value else {
            return Err(invalid("a JSON-RPC message must be an object", None));
        };

        let id = map.remove("id");
        let method = map.remove("method");
        let params = map.remove("params");
        let result = map.remove("result");
        let error = map.remove("error");

        if let Some(method) = method {
            let Value::String(method) = method else {
                return Err(invalid("'method' must be a string", None));
            };
            let params = params_from_json(params)?;
            return match id {
                Some(id) if !id.is_null() => Ok(Message::Request(RequestMessage {
                    id: id_from_json(id)?,
                    method,
                    params,
                })),
                _ => Ok(Message::Notification(NotificationMessage { method, params })),
            };
        }

        if let Some(error) = error {
            let id = match id {
                None | Some(Value::Null) => None,
                Some(id) => Some(id_from_json(id)?),
            };
            let error: ResponseError = serde_json::from_value(error)
                .map_err(|e| invalid(format!("malformed 'error' member: {e}"), None))?;
            return Ok(Message::Response(ResponseMessage::Error { id, error }));
        }

        if let Some(result) = result {
            let id = id.ok_or_else(|| invalid("a result response must carry an id", None))?;
            return Ok(Message::Response(ResponseMessage::Result {
                id: id_from_json(id)?,
                result,
            }));
        }

        Err(invalid(
            "message carries neither 'method', 'result' nor 'error'",
            None,
        ))
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Message::from_json(value).map_err(serde::de::Error::custom)
    }
}

fn id_to_json(id: &MessageId) -> Value {
    match id {
        MessageId::Number(n) => Value::Number((*n).into()),
        MessageId::String(s) => Value::String(s.clone()),
    }
}

fn id_from_json(value: Value) -> Result<MessageId, RpcError> {
    match value {
        Value::String(s) => Ok(MessageId::String(s)),
        Value::Number(n) => n
            .as_i64()
            .map(MessageId::Number)
            .ok_or_else(|| invalid("message id must be an integer or a string", None)),
        other => Err(invalid(
            format!("message id must be an integer or a string, found {other}"),
            None,
        )),
    }
}

fn params_from_json(params: Option<Value>) -> Result<Option<JsonParams>, RpcError> {
    match params {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(JsonParams::Array(items))),
        Some(Value::Object(map)) => Ok(Some(JsonParams::Object(map))),
        Some(other) => Err(invalid(
            format!("'params' must be an array or an object, found {other}"),
            None,
        )),
    }
}

fn invalid(message: impl Into<String>, payload: Option<String>) -> RpcError {
    RpcError::issue(ResponseErrorCode::InvalidRequest, message, payload)
}
