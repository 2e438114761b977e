//! Cancellation in both directions.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use duplexrpc::{
    JsonParams, JsonRpcMethod, LocalEndpoint, Message, MessageConsumer, MessageId, MethodRegistry,
    NotificationMessage, RemoteEndpoint, RequestMessage, ResponseErrorCode, ResponseMessage,
    RpcError, TypeDescriptor, CANCEL_METHOD,
};
use serde_json::{json, Value};

/// A service whose requests never complete on their own; only
/// cancellation gets a response out.
struct StallingService;

#[async_trait]
impl LocalEndpoint for StallingService {
    fn notify(&self, _method: &str, _params: Vec<Value>) -> Result<(), RpcError> {
        Ok(())
    }

    async fn request(&self, _method: &str, _params: Vec<Value>) -> Result<Value, RpcError> {
        futures::future::pending().await
    }
}

fn registry() -> MethodRegistry {
    MethodRegistry::new([JsonRpcMethod::request(
        "request",
        vec![TypeDescriptor::String],
        TypeDescriptor::String,
    )])
}

fn setup() -> (Arc<RemoteEndpoint>, Arc<Mutex<Vec<Message>>>) {
    let log: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));
    let consumer = {
        let log = log.clone();
        Arc::new(move |message: Message| -> Result<(), RpcError> {
            log.lock().unwrap().push(message);
            Ok(())
        }) as Arc<dyn MessageConsumer>
    };
    let (endpoint, mut driver) = RemoteEndpoint::new(registry(), Arc::new(StallingService), consumer);
    tokio::spawn(async move { driver.run().await });
    (endpoint, log)
}

fn cancel_notification(id: Value) -> Message {
    let Value::Object(map) = json!({ "id": id }) else {
        unreachable!()
    };
    Message::Notification(NotificationMessage {
        method: CANCEL_METHOD.to_string(),
        params: Some(JsonParams::Object(map)),
    })
}

#[tokio::test]
async fn cancelled_inbound_request_responds_with_request_cancelled() {
    let (endpoint, log) = setup();

    endpoint.consume(Message::Request(RequestMessage {
        id: MessageId::String("1".to_string()),
        method: "request".to_string(),
        params: Some(JsonParams::Array(vec![json!("myparam")])),
    }));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(log.lock().unwrap().is_empty(), "handler should still be pending");

    endpoint.consume(cancel_notification(json!("1")));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    match &log[0] {
        Message::Response(ResponseMessage::Error { id, error }) => {
            assert_eq!(id, &Some(MessageId::String("1".to_string())));
            assert_eq!(error.code, ResponseErrorCode::RequestCancelled.code());
            assert_eq!(
                error.message,
                "The request (id: \"1\", method: 'request') has been cancelled"
            );
        }
        other => panic!("expected an error response, got {other:?}"),
    }
}

#[tokio::test]
async fn cancel_for_an_unknown_id_produces_no_wire_output() {
    let (endpoint, log) = setup();

    endpoint.consume(cancel_notification(json!(42)));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn explicit_cancel_emits_cancel_request_exactly_once() {
    let (endpoint, log) = setup();

    let pending = endpoint.request("request", vec![json!("myparam")]);
    let id = pending.id().clone();
    pending.cancel();

    let messages = log.lock().unwrap().clone();
    assert_eq!(messages.len(), 2);
    assert!(matches!(&messages[0], Message::Request(_)));
    match &messages[1] {
        Message::Notification(notification) => {
            assert_eq!(notification.method, CANCEL_METHOD);
            assert_eq!(
                notification.params,
                Some(JsonParams::Object(
                    json!({ "id": 1 }).as_object().unwrap().clone()
                ))
            );
        }
        other => panic!("expected the cancel notification, got {other:?}"),
    }

    // The pending entry is gone: a late response is dropped without
    // producing further output.
    endpoint.consume(Message::Response(ResponseMessage::Result {
        id,
        result: json!("too late"),
    }));
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn dropping_a_pending_future_cancels_the_request() {
    let (endpoint, log) = setup();

    let pending = endpoint.request("request", vec![json!("myparam")]);
    drop(pending);

    let messages = log.lock().unwrap().clone();
    assert_eq!(messages.len(), 2);
    match &messages[1] {
        Message::Notification(notification) => {
            assert_eq!(notification.method, CANCEL_METHOD);
        }
        other => panic!("expected the cancel notification, got {other:?}"),
    }
}

#[tokio::test]
async fn completed_requests_do_not_emit_cancellations() {
    let (endpoint, log) = setup();

    let pending = endpoint.request("request", vec![json!("myparam")]);
    endpoint.consume(Message::Response(ResponseMessage::Result {
        id: MessageId::Number(1),
        result: json!("success"),
    }));
    assert_eq!(pending.await.unwrap(), json!("success"));

    // Only the original request reached the wire.
    let messages = log.lock().unwrap().clone();
    assert_eq!(messages.len(), 1);
    assert!(matches!(&messages[0], Message::Request(_)));
}

#[tokio::test]
async fn cancel_received_before_the_handler_runs_still_wins() {
    let (endpoint, log) = setup();

    // Feed the request and its cancellation back-to-back, without
    // yielding in between; the handler task must observe the abort on
    // its first poll.
    endpoint.consume(Message::Request(RequestMessage {
        id: MessageId::Number(7),
        method: "request".to_string(),
        params: Some(JsonParams::Array(vec![json!("myparam")])),
    }));
    endpoint.consume(cancel_notification(json!(7)));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    match &log[0] {
        Message::Response(ResponseMessage::Error { error, .. }) => {
            assert_eq!(error.code, ResponseErrorCode::RequestCancelled.code());
        }
        other => panic!("expected an error response, got {other:?}"),
    }
}
