//! Error taxonomy for the endpoint runtime.

use serde_json::Value;
use thiserror::Error;

use crate::message::{ResponseError, ResponseErrorCode};

/// One problem found while decoding or framing a message. Issues are
/// collected so a single bad message can report everything wrong with it.
#[derive(Clone, Debug)]
pub struct MessageIssue {
    pub code: ResponseErrorCode,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum RpcError {
    /// The underlying stream failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The connection has shut down; no further messages can be sent.
    #[error("connection closed")]
    Closed,

    /// A message could not be parsed or decoded against its method
    /// schema. Carries the offending payload when known.
    #[error("{}", format_issues(issues))]
    Issues {
        payload: Option<String>,
        issues: Vec<MessageIssue>,
    },

    /// A local caller passed arguments that do not fit the method
    /// descriptor (wrong arity, unregistered method).
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The remote peer answered a request with an error response.
    #[error("remote error {}: {}", .0.code, .0.message)]
    ErrorResponse(ResponseError),

    /// The pending request was cancelled before a response arrived.
    #[error("request cancelled")]
    Cancelled,

    /// A failure raised by a local handler.
    #[error("{0}")]
    Internal(String),
}

impl RpcError {
    /// A single-issue [`RpcError::Issues`].
    pub fn issue(
        code: ResponseErrorCode,
        message: impl Into<String>,
        payload: Option<String>,
    ) -> Self {
        RpcError::Issues {
            payload,
            issues: vec![MessageIssue {
                code,
                message: message.into(),
            }],
        }
    }

    pub fn issues(issues: Vec<MessageIssue>, payload: Option<String>) -> Self {
        RpcError::Issues { payload, issues }
    }

    /// Shape this error into the `error` member of a response. This is
    /// the default exception handler of a [`RemoteEndpoint`].
    ///
    /// [`RemoteEndpoint`]: crate::endpoint::RemoteEndpoint
    pub fn to_response_error(&self) -> ResponseError {
        match self {
            RpcError::ErrorResponse(error) => error.clone(),
            RpcError::Cancelled => ResponseError::new(
                ResponseErrorCode::RequestCancelled,
                "The request has been cancelled",
            ),
            RpcError::Issues { payload, issues } => {
                let code = issues
                    .first()
                    .map(|issue| issue.code)
                    .unwrap_or(ResponseErrorCode::ParseError);
                let mut error = ResponseError::new(code, format_issues(issues));
                if let Some(payload) = payload {
                    error = error.with_data(Value::String(payload.clone()));
                }
                error
            }
            RpcError::InvalidArguments(message) => ResponseError::invalid_params(message.clone()),
            other => ResponseError::internal_error().with_data(Value::String(other.to_string())),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(error: serde_json::Error) -> Self {
        RpcError::issue(ResponseErrorCode::ParseError, error.to_string(), None)
    }
}

fn format_issues(issues: &[MessageIssue]) -> String {
    issues
        .iter()
        .map(|issue| issue.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedded_response_errors_pass_through_verbatim() {
        let embedded = ResponseError::new(ResponseErrorCode::ContentModified, "stale")
            .with_data(json!({"version": 3}));
        let shaped = RpcError::ErrorResponse(embedded.clone()).to_response_error();
        assert_eq!(shaped, embedded);
    }

    #[test]
    fn unknown_failures_shape_to_internal_error_with_stringified_data() {
        let shaped = RpcError::Internal("BAAZ".to_string()).to_response_error();
        assert_eq!(shaped.code, ResponseErrorCode::InternalError.code());
        assert_eq!(shaped.message, "Internal error.");
        assert_eq!(shaped.data, Some(Value::String("BAAZ".to_string())));
    }

    #[test]
    fn issues_keep_their_code_and_payload() {
        let error = RpcError::issue(
            ResponseErrorCode::InvalidParams,
            "parameter 0: expected string, found number",
            Some("[42]".to_string()),
        );
        let shaped = error.to_response_error();
        assert_eq!(shaped.code, ResponseErrorCode::InvalidParams.code());
        assert_eq!(shaped.data, Some(Value::String("[42]".to_string())));
    }
}
