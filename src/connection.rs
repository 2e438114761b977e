//! Wiring an endpoint to a pair of byte streams.
//!
//! [`Connection::new`] returns the endpoint handle plus a single future
//! that drives everything: the reader pump, the writer actor that owns
//! the output stream, and the task driver executing inbound handlers.
//! When the input stream stops, inbound handlers that are still running
//! are driven to completion and their responses flushed before the
//! future completes; a writer failure tears the connection down
//! immediately.

use std::sync::Arc;

use futures::channel::{mpsc, oneshot};
use futures::{pin_mut, AsyncRead, AsyncWrite, FutureExt, StreamExt};

use crate::endpoint::{LocalEndpoint, MessageConsumer, RemoteEndpoint, TaskDriver};
use crate::error::RpcError;
use crate::framing::{FrameReader, FrameWriter};
use crate::message::Message;
use crate::method::MethodRegistry;

pub struct Connection;

impl Connection {
    /// Connect a local endpoint to a byte-stream pair.
    ///
    /// The returned future must be polled for the connection to make any
    /// progress; spawn it or select over it alongside client logic.
    pub fn new<W, R>(
        registry: MethodRegistry,
        local: Arc<dyn LocalEndpoint>,
        outgoing: W,
        incoming: R,
    ) -> (
        Arc<RemoteEndpoint>,
        impl std::future::Future<Output = Result<(), RpcError>>,
    )
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded::<Message>();
        let consumer: Arc<dyn MessageConsumer> = Arc::new(ChannelConsumer { tx: outgoing_tx });
        let (endpoint, mut driver) = RemoteEndpoint::new(registry, local, consumer);

        let io = {
            let endpoint = endpoint.clone();
            async move {
                let (flush_tx, flush_rx) = oneshot::channel();
                let write = write_actor(outgoing_rx, FrameWriter::new(outgoing), flush_rx).fuse();
                let read = listen(endpoint.clone(), FrameReader::new(incoming)).fuse();
                pin_mut!(write, read);

                // Serve until the input side stops. The writer and the
                // handler tasks never finish on their own, so this phase
                // ends with the reader (EOF or transport failure) unless
                // the writer fails first.
                let served = {
                    let serve_tasks = driver.run().fuse();
                    pin_mut!(serve_tasks);
                    futures::select! {
                        result = read => result,
                        result = write => {
                            endpoint.fail_pending_requests(|| RpcError::Closed);
                            return result;
                        }
                        () = serve_tasks => Ok(()),
                    }
                };

                // The input side is done and no new inbound work can
                // arrive. Let in-flight handlers run to completion, then
                // flush their responses before tearing the writer down.
                driver.drain().await;
                let _ = flush_tx.send(());
                (&mut write).await?;
                served
            }
        };

        (endpoint, io)
    }
}

/// Drive the reader until EOF, feeding each message to the endpoint.
///
/// Parse issues are answered with an id-less error response and reading
/// continues. EOF fails all pending outbound requests with a closed
/// error and completes successfully; any other transport failure fails
/// the pending requests and the returned future.
pub async fn listen<R>(
    endpoint: Arc<RemoteEndpoint>,
    mut reader: FrameReader<R>,
) -> Result<(), RpcError>
where
    R: AsyncRead + Unpin,
{
    loop {
        match reader.next_message().await {
            Ok(Some(message)) => endpoint.consume(message),
            Ok(None) => {
                tracing::info!("input stream closed, shutting down endpoint");
                endpoint.fail_pending_requests(|| RpcError::Closed);
                return Ok(());
            }
            Err(error @ RpcError::Issues { .. }) => {
                tracing::warn!(%error, "failed to parse incoming message");
                endpoint.reject(&error);
            }
            Err(error) => {
                tracing::warn!(%error, "transport failed, shutting down endpoint");
                let reason = error.to_string();
                endpoint
                    .fail_pending_requests(|| RpcError::Transport(std::io::Error::other(reason.clone())));
                return Err(error);
            }
        }
    }
}

/// Owns the framed output stream and serializes all producers: messages
/// are written in the order they were enqueued, one frame at a time.
///
/// The `flush` signal announces shutdown: the actor then stops accepting
/// new messages, writes out everything already queued, and returns.
async fn write_actor<W>(
    mut rx: mpsc::UnboundedReceiver<Message>,
    mut writer: FrameWriter<W>,
    mut flush: oneshot::Receiver<()>,
) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        futures::select! {
            message = rx.next() => match message {
                Some(message) => writer.write_message(&message).await?,
                None => return Ok(()),
            },
            _ = flush => break,
        }
    }
    rx.close();
    while let Ok(Some(message)) = rx.try_next() {
        writer.write_message(&message).await?;
    }
    Ok(())
}

struct ChannelConsumer {
    tx: mpsc::UnboundedSender<Message>,
}

impl MessageConsumer for ChannelConsumer {
    fn consume(&self, message: Message) -> Result<(), RpcError> {
        self.tx.unbounded_send(message).map_err(|_| RpcError::Closed)
    }
}
