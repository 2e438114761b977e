//! Bidirectional JSON-RPC 2.0 endpoint runtime.
//!
//! `duplexrpc` turns a byte-stream transport into a symmetric
//! request/notification exchange between a local service and a remote
//! peer: Content-Length framed messages, schema-aware parameter and
//! result coding, correlation of outbound requests with inbound
//! responses, and `$/cancelRequest` cancellation in both directions.
//!
//! # Overview
//!
//! Register your method schemas in a [`MethodRegistry`], implement
//! [`LocalEndpoint`] for the service that answers inbound traffic, and
//! wire both to a byte-stream pair:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use duplexrpc::{
//!     Connection, JsonRpcMethod, LocalEndpoint, MethodRegistry, RpcError, TypeDescriptor,
//! };
//! use serde_json::{json, Value};
//!
//! struct Service;
//!
//! #[async_trait]
//! impl LocalEndpoint for Service {
//!     fn notify(&self, _method: &str, _params: Vec<Value>) -> Result<(), RpcError> {
//!         Ok(())
//!     }
//!
//!     async fn request(&self, _method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
//!         Ok(params.into_iter().next().unwrap_or(Value::Null))
//!     }
//! }
//!
//! # async fn example(outgoing: impl futures::AsyncWrite + Send + Unpin + 'static,
//! #                  incoming: impl futures::AsyncRead + Send + Unpin + 'static)
//! # -> Result<(), RpcError> {
//! let registry = MethodRegistry::new([JsonRpcMethod::request(
//!     "echo",
//!     vec![TypeDescriptor::String],
//!     TypeDescriptor::String,
//! )]);
//! let (endpoint, io) = Connection::new(registry, Arc::new(Service), outgoing, incoming);
//!
//! let pending = endpoint.request("echo", vec![json!("hello")]);
//! let io = io.fuse();
//! let pending = pending.fuse();
//! futures::pin_mut!(io, pending);
//! futures::select! {
//!     result = io => result?,
//!     response = pending => { let _ = response?; }
//! };
//! # Ok(())
//! # }
//! # use futures::FutureExt;
//! ```
//!
//! The endpoint itself owns no I/O: inbound messages enter through
//! [`RemoteEndpoint::consume`] and outbound messages leave through a
//! [`MessageConsumer`], so alternative transports only need to speak
//! [`Message`].

pub mod codec;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod framing;
pub mod message;
pub mod method;

pub use codec::JsonCodec;
pub use connection::{listen, Connection};
pub use endpoint::{
    EndpointBuilder, LocalEndpoint, MessageConsumer, RemoteEndpoint, ResponseFuture, TaskDriver,
};
pub use error::{MessageIssue, RpcError};
pub use framing::{FrameReader, FrameWriter};
pub use message::{
    CancelParams, JsonParams, Message, MessageId, NotificationMessage, RequestMessage,
    ResponseError, ResponseErrorCode, ResponseMessage, CANCEL_METHOD,
};
pub use method::{
    is_optional_method, JsonRpcMethod, MethodKind, MethodRegistry, TypeDescriptor,
};
