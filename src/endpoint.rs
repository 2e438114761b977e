//! The bidirectional endpoint core.
//!
//! [`RemoteEndpoint`] dispatches inbound requests and notifications to a
//! [`LocalEndpoint`], tracks outbound requests until their responses
//! arrive, and bridges `$/cancelRequest` in both directions. It owns no
//! I/O: inbound messages are fed through [`RemoteEndpoint::consume`] (by
//! the reader pump) and outbound messages leave through a
//! [`MessageConsumer`].
//!
//! Inbound request handlers run as dedicated tasks executed by the
//! [`TaskDriver`], so a slow handler never stalls the dispatcher and a
//! later `$/cancelRequest` can still be observed.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::channel::{mpsc, oneshot};
use futures::future::{AbortHandle, Abortable, BoxFuture};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde_json::Value;

use crate::codec::JsonCodec;
use crate::error::RpcError;
use crate::message::{
    CancelParams, JsonParams, Message, MessageId, NotificationMessage, RequestMessage,
    ResponseError, ResponseMessage, CANCEL_METHOD,
};
use crate::method::{is_optional_method, MethodRegistry};

/// A sink that accepts one framed message for transmission. Must be safe
/// for concurrent invocation; the channel into the writer actor is the
/// canonical implementation.
pub trait MessageConsumer: Send + Sync {
    fn consume(&self, message: Message) -> Result<(), RpcError>;
}

impl<F> MessageConsumer for F
where
    F: Fn(Message) -> Result<(), RpcError> + Send + Sync,
{
    fn consume(&self, message: Message) -> Result<(), RpcError> {
        self(message)
    }
}

/// The capability the core invokes to deliver inbound traffic to the
/// local service. How it is implemented (hand-written dispatch, generated
/// code) is not the core's business.
#[async_trait]
pub trait LocalEndpoint: Send + Sync {
    /// Deliver a notification. Errors are logged, never answered.
    fn notify(&self, method: &str, params: Vec<Value>) -> Result<(), RpcError>;

    /// Handle a request. The returned future is dropped when the peer
    /// cancels the request, so handlers must be cancel-safe.
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError>;
}

/// Maps a handler failure to the `error` member of the response.
pub type ExceptionHandler = Box<dyn Fn(&RpcError) -> ResponseError + Send + Sync>;

struct PendingOutbound {
    method: String,
    respond: oneshot::Sender<Result<Value, RpcError>>,
}

#[derive(Default)]
struct EndpointState {
    /// Ordered by id so shutdown fails callers deterministically. The
    /// entry's method name doubles as the method provider for decoding
    /// the eventual response.
    outbound: BTreeMap<MessageId, PendingOutbound>,
    inbound: HashMap<MessageId, AbortHandle>,
    /// Set once the connection shuts down; new outbound requests fail
    /// immediately instead of pending forever.
    closed: bool,
}

pub struct RemoteEndpoint {
    next_id: AtomicI64,
    state: Mutex<EndpointState>,
    out: Arc<dyn MessageConsumer>,
    local: Arc<dyn LocalEndpoint>,
    codec: JsonCodec,
    exception_handler: ExceptionHandler,
    tasks: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
}

impl RemoteEndpoint {
    /// Create an endpoint with the default exception handler. Returns the
    /// endpoint and the [`TaskDriver`] that must be polled for inbound
    /// request handlers to make progress.
    pub fn new(
        registry: MethodRegistry,
        local: Arc<dyn LocalEndpoint>,
        out: Arc<dyn MessageConsumer>,
    ) -> (Arc<Self>, TaskDriver) {
        Self::builder(registry).build(local, out)
    }

    pub fn builder(registry: MethodRegistry) -> EndpointBuilder {
        EndpointBuilder {
            registry,
            exception_handler: Box::new(RpcError::to_response_error),
        }
    }

    /// Issue a request to the remote peer.
    ///
    /// The returned future resolves once the matching response arrives.
    /// Dropping it (or calling [`ResponseFuture::cancel`]) before
    /// completion sends `$/cancelRequest` for the allocated id.
    pub fn request(self: &Arc<Self>, method: &str, args: Vec<Value>) -> ResponseFuture {
        let id = MessageId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();

        let params = match self.codec.serialize_params(method, &args) {
            Ok(params) => params,
            Err(error) => {
                let _ = tx.send(Err(error));
                return ResponseFuture::detached(id, method, rx);
            }
        };

        // Register before emitting so a fast response cannot race the
        // pending entry.
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                drop(state);
                let _ = tx.send(Err(RpcError::Closed));
                return ResponseFuture::detached(id, method, rx);
            }
            state.outbound.insert(
                id.clone(),
                PendingOutbound {
                    method: method.to_string(),
                    respond: tx,
                },
            );
        }

        let message = Message::Request(RequestMessage {
            id: id.clone(),
            method: method.to_string(),
            params: Some(params),
        });
        if let Err(error) = self.out.consume(message) {
            if let Some(pending) = self.state.lock().unwrap().outbound.remove(&id) {
                let _ = pending.respond.send(Err(error));
            }
        }

        ResponseFuture {
            id,
            method: method.to_string(),
            rx,
            endpoint: Arc::downgrade(self),
            done: false,
        }
    }

    /// Send a notification to the remote peer. Encoding failures surface
    /// to the caller; consumer failures are logged and swallowed, since
    /// nobody is waiting.
    pub fn notify(&self, method: &str, args: Vec<Value>) -> Result<(), RpcError> {
        let params = self.codec.serialize_params(method, &args)?;
        let message = Message::Notification(NotificationMessage {
            method: method.to_string(),
            params: Some(params),
        });
        if let Err(error) = self.out.consume(message) {
            tracing::warn!(%error, "Error while processing the message");
        }
        Ok(())
    }

    /// Dispatch one inbound message. Never fails: every inbound problem
    /// is translated into a response or a log line so the pump keeps
    /// reading.
    pub fn consume(self: &Arc<Self>, message: Message) {
        match message {
            Message::Request(request) => self.handle_request(request),
            Message::Notification(notification) => self.handle_notification(notification),
            Message::Response(response) => self.handle_response(response),
        }
    }

    /// Report an inbound payload that never became a message (framing or
    /// JSON parse failure): answers with an id-less error response.
    pub fn reject(&self, error: &RpcError) {
        self.emit_response(ResponseMessage::Error {
            id: None,
            error: error.to_response_error(),
        });
    }

    /// Fail every pending outbound request, in id order, and refuse new
    /// ones from here on. Called by the pump when the connection shuts
    /// down.
    pub fn fail_pending_requests(&self, make_error: impl Fn() -> RpcError) {
        let outbound = {
            let mut state = self.state.lock().unwrap();
            state.closed = true;
            std::mem::take(&mut state.outbound)
        };
        for (id, pending) in outbound {
            tracing::debug!(%id, method = %pending.method, "failing pending request on shutdown");
            let _ = pending.respond.send(Err(make_error()));
        }
    }

    fn handle_request(self: &Arc<Self>, request: RequestMessage) {
        let RequestMessage { id, method, params } = request;

        if self.codec.resolve(&method).is_none() {
            if is_optional_method(&method) {
                tracing::info!(%method, %id, "unknown optional method, answering null");
                self.emit_response(ResponseMessage::Result {
                    id,
                    result: Value::Null,
                });
            } else {
                self.emit_response(ResponseMessage::Error {
                    id: Some(id),
                    error: ResponseError::method_not_found(&method),
                });
            }
            return;
        }

        let (handle, registration) = AbortHandle::new_pair();
        self.state
            .lock()
            .unwrap()
            .inbound
            .insert(id.clone(), handle);

        let args = match self.codec.deserialize_params(&method, params) {
            Ok(args) => args,
            Err(error) => {
                self.state.lock().unwrap().inbound.remove(&id);
                self.emit_response(ResponseMessage::Error {
                    id: Some(id),
                    error: error.to_response_error(),
                });
                return;
            }
        };

        let endpoint = Arc::clone(self);
        let task_id = id.clone();
        let task = async move {
            let handler = endpoint.local.request(&method, args);
            let response = match Abortable::new(handler, registration).await {
                Ok(Ok(value)) => match endpoint.codec.serialize_result(&method, value) {
                    Ok(result) => ResponseMessage::Result {
                        id: id.clone(),
                        result,
                    },
                    Err(error) => ResponseMessage::Error {
                        id: Some(id.clone()),
                        error: (endpoint.exception_handler)(&error),
                    },
                },
                Ok(Err(error)) => ResponseMessage::Error {
                    id: Some(id.clone()),
                    error: (endpoint.exception_handler)(&error),
                },
                Err(_aborted) => ResponseMessage::Error {
                    id: Some(id.clone()),
                    error: ResponseError::request_cancelled(&id, &method),
                },
            };
            endpoint.state.lock().unwrap().inbound.remove(&id);
            endpoint.emit_response(response);
        }
        .boxed();

        if self.tasks.unbounded_send(task).is_err() {
            // The driver is gone; the connection is shutting down and no
            // response will be delivered anyway.
            tracing::warn!(id = %task_id, "dropping inbound request, task driver has shut down");
            self.state.lock().unwrap().inbound.remove(&task_id);
        }
    }

    fn handle_notification(self: &Arc<Self>, notification: NotificationMessage) {
        let NotificationMessage { method, params } = notification;

        // The cancellation notification is consumed by the core and never
        // reaches user handlers.
        if method == CANCEL_METHOD {
            self.handle_cancel(params);
            return;
        }

        if self.codec.resolve(&method).is_none() {
            if is_optional_method(&method) {
                tracing::info!(%method, "ignoring unknown optional notification");
            } else {
                tracing::warn!(%method, "no handler for notification");
            }
            return;
        }

        match self.codec.deserialize_params(&method, params) {
            Ok(args) => {
                if let Err(error) = self.local.notify(&method, args) {
                    tracing::warn!(%method, %error, "notification handler failed");
                }
            }
            Err(error) => {
                tracing::warn!(%method, %error, "failed to decode notification params");
            }
        }
    }

    fn handle_cancel(&self, params: Option<JsonParams>) {
        let Some(params) = params else {
            tracing::warn!("cancel notification without params");
            return;
        };
        let cancel: CancelParams = match serde_json::from_value(params.into_value()) {
            Ok(cancel) => cancel,
            Err(error) => {
                tracing::warn!(%error, "malformed cancel notification");
                return;
            }
        };
        let state = self.state.lock().unwrap();
        match state.inbound.get(&cancel.id) {
            Some(handle) => {
                tracing::debug!(id = %cancel.id, "cancelling inbound request");
                handle.abort();
            }
            // Cancels for unknown ids (already answered, never seen) are
            // dropped silently.
            None => tracing::trace!(id = %cancel.id, "cancel for unknown request id"),
        }
    }

    fn handle_response(&self, response: ResponseMessage) {
        match response {
            ResponseMessage::Result { id, result } => {
                let pending = self.state.lock().unwrap().outbound.remove(&id);
                let Some(pending) = pending else {
                    tracing::warn!(%id, "received response for unknown request id");
                    return;
                };
                let outcome = self.codec.deserialize_result(&pending.method, result);
                let _ = pending.respond.send(outcome);
            }
            ResponseMessage::Error { id: None, error } => {
                tracing::warn!(code = error.code, message = %error.message, "received error response without id");
            }
            ResponseMessage::Error { id: Some(id), error } => {
                let pending = self.state.lock().unwrap().outbound.remove(&id);
                let Some(pending) = pending else {
                    tracing::warn!(%id, "received response for unknown request id");
                    return;
                };
                let _ = pending.respond.send(Err(RpcError::ErrorResponse(error)));
            }
        }
    }

    /// Cancel a pending outbound request: notify the peer, then discard
    /// the entry. The notification goes out exactly once because the
    /// entry is removed under the same lock.
    fn cancel_outbound(&self, id: &MessageId) {
        let mut state = self.state.lock().unwrap();
        if !state.outbound.contains_key(id) {
            return;
        }
        let params = serde_json::to_value(CancelParams { id: id.clone() })
            .ok()
            .and_then(|value| match value {
                Value::Object(map) => Some(JsonParams::Object(map)),
                _ => None,
            });
        let notification = Message::Notification(NotificationMessage {
            method: CANCEL_METHOD.to_string(),
            params,
        });
        if let Err(error) = self.out.consume(notification) {
            tracing::warn!(%error, "Error while processing the message");
        }
        if let Some(pending) = state.outbound.remove(id) {
            let _ = pending.respond.send(Err(RpcError::Cancelled));
        }
    }

    fn emit_response(&self, response: ResponseMessage) {
        if let Err(error) = self.out.consume(Message::Response(response)) {
            tracing::warn!(%error, "Error while processing the message");
        }
    }
}

pub struct EndpointBuilder {
    registry: MethodRegistry,
    exception_handler: ExceptionHandler,
}

impl EndpointBuilder {
    /// Replace the default handler-failure shaping. Embedded
    /// [`RpcError::ErrorResponse`] errors should normally pass through
    /// verbatim, as the default does.
    pub fn exception_handler(
        mut self,
        handler: impl Fn(&RpcError) -> ResponseError + Send + Sync + 'static,
    ) -> Self {
        self.exception_handler = Box::new(handler);
        self
    }

    pub fn build(
        self,
        local: Arc<dyn LocalEndpoint>,
        out: Arc<dyn MessageConsumer>,
    ) -> (Arc<RemoteEndpoint>, TaskDriver) {
        let (task_tx, task_rx) = mpsc::unbounded();
        let endpoint = Arc::new(RemoteEndpoint {
            next_id: AtomicI64::new(1),
            state: Mutex::new(EndpointState::default()),
            out,
            local,
            codec: JsonCodec::new(Arc::new(self.registry)),
            exception_handler: self.exception_handler,
            tasks: task_tx,
        });
        (
            endpoint,
            TaskDriver {
                rx: task_rx,
                running: FuturesUnordered::new(),
            },
        )
    }
}

/// Executes inbound request handler tasks. One driver per endpoint; the
/// connection future polls it alongside the reader and writer.
pub struct TaskDriver {
    rx: mpsc::UnboundedReceiver<BoxFuture<'static, ()>>,
    running: FuturesUnordered<BoxFuture<'static, ()>>,
}

impl TaskDriver {
    /// Accept and execute handler tasks until the endpoint is dropped.
    /// An exhausted task set parks the loop on the channel alone.
    pub async fn run(&mut self) {
        loop {
            futures::select! {
                task = self.rx.next() => match task {
                    Some(task) => self.running.push(task),
                    None => break,
                },
                _ = self.running.next() => {}
            }
        }
        while self.running.next().await.is_some() {}
    }

    /// Stop accepting new tasks and run the already-accepted ones to
    /// completion. Used at shutdown so in-flight inbound requests still
    /// get their responses emitted.
    pub async fn drain(mut self) {
        self.rx.close();
        while let Ok(Some(task)) = self.rx.try_next() {
            self.running.push(task);
        }
        while self.running.next().await.is_some() {}
    }
}

/// A pending outbound request.
///
/// Resolves with the decoded result, or fails with the peer's error
/// response, a transport failure, or cancellation. Dropping the future
/// before completion cancels the request on the wire; structured
/// concurrency therefore propagates cancellation to the peer for free.
#[must_use = "dropping a ResponseFuture cancels the request"]
pub struct ResponseFuture {
    id: MessageId,
    method: String,
    rx: oneshot::Receiver<Result<Value, RpcError>>,
    endpoint: Weak<RemoteEndpoint>,
    done: bool,
}

impl ResponseFuture {
    fn detached(
        id: MessageId,
        method: &str,
        rx: oneshot::Receiver<Result<Value, RpcError>>,
    ) -> Self {
        Self {
            id,
            method: method.to_string(),
            rx,
            endpoint: Weak::new(),
            done: false,
        }
    }

    /// The id allocated for this request.
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Cancel the request explicitly: emits `$/cancelRequest` if the
    /// request is still pending.
    pub fn cancel(mut self) {
        self.cancel_if_pending();
    }

    fn cancel_if_pending(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        if let Some(endpoint) = self.endpoint.upgrade() {
            endpoint.cancel_outbound(&self.id);
        }
    }
}

impl Future for ResponseFuture {
    type Output = Result<Value, RpcError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => {
                this.done = true;
                Poll::Ready(outcome)
            }
            Poll::Ready(Err(_dropped)) => {
                this.done = true;
                Poll::Ready(Err(RpcError::Closed))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        self.cancel_if_pending();
    }
}
