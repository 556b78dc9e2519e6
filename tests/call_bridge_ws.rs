//! End-to-end call bridging against an in-memory inference stream.
//!
//! Binds the real router on an ephemeral port, connects a WebSocket client
//! playing the telephony provider, and watches what the bridge sends on the
//! inference stream seam.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use sonic_bridge::core::inference::{EventSink, EventSource, StreamConnector, StreamError};
use sonic_bridge::core::session::events::{ClientEvent, ServerEvent};
use sonic_bridge::{app, AppState, ServerConfig};

#[derive(Clone)]
struct MockHandle {
    frames: Arc<StdMutex<Vec<Value>>>,
    closed: Arc<AtomicBool>,
    server_tx: Arc<StdMutex<Option<mpsc::UnboundedSender<ServerEvent>>>>,
}

impl MockHandle {
    fn frames(&self) -> Vec<Value> {
        self.frames.lock().unwrap().clone()
    }

    fn push(&self, event: ServerEvent) {
        self.server_tx
            .lock()
            .unwrap()
            .as_ref()
            .expect("stream still open")
            .send(event)
            .unwrap();
    }

    /// Drops the sender half so the source reports end-of-stream.
    fn end_stream(&self) {
        self.server_tx.lock().unwrap().take();
    }

    fn event_kinds(&self) -> Vec<String> {
        self.frames()
            .iter()
            .map(|frame| {
                frame["event"]
                    .as_object()
                    .unwrap()
                    .keys()
                    .next()
                    .unwrap()
                    .clone()
            })
            .collect()
    }

    async fn wait_for(&self, predicate: impl Fn(&MockHandle) -> bool) {
        for _ in 0..200 {
            if predicate(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("condition not reached within 5s; frames: {:?}", self.event_kinds());
    }
}

struct MockConnector {
    handle: MockHandle,
    source_rx: StdMutex<Option<mpsc::UnboundedReceiver<ServerEvent>>>,
    fail_connect: bool,
}

impl MockConnector {
    fn new(fail_connect: bool) -> (Self, MockHandle) {
        let (server_tx, source_rx) = mpsc::unbounded_channel();
        let handle = MockHandle {
            frames: Arc::new(StdMutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            server_tx: Arc::new(StdMutex::new(Some(server_tx))),
        };
        (
            Self {
                handle: handle.clone(),
                source_rx: StdMutex::new(Some(source_rx)),
                fail_connect,
            },
            handle,
        )
    }
}

#[async_trait]
impl StreamConnector for MockConnector {
    async fn connect(&self) -> Result<(Box<dyn EventSink>, Box<dyn EventSource>), StreamError> {
        if self.fail_connect {
            return Err(StreamError::ConnectFailed("injected failure".to_string()));
        }
        let rx = self
            .source_rx
            .lock()
            .unwrap()
            .take()
            .expect("one call per test server");
        Ok((
            Box::new(MockSink {
                handle: self.handle.clone(),
            }),
            Box::new(MockSource { rx }),
        ))
    }
}

struct MockSink {
    handle: MockHandle,
}

#[async_trait]
impl EventSink for MockSink {
    async fn send(&mut self, event: ClientEvent) -> Result<(), StreamError> {
        let value: Value = serde_json::from_slice(&event.encode()?).unwrap();
        self.handle.frames.lock().unwrap().push(value);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.handle.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MockSource {
    rx: mpsc::UnboundedReceiver<ServerEvent>,
}

#[async_trait]
impl EventSource for MockSource {
    async fn recv(&mut self) -> Result<Option<ServerEvent>, StreamError> {
        Ok(self.rx.recv().await)
    }
}

async fn spawn_bridge(fail_connect: bool) -> (SocketAddr, MockHandle) {
    let (connector, handle) = MockConnector::new(fail_connect);
    let state = AppState::with_connector(ServerConfig::default(), Arc::new(connector));
    let router = app(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, handle)
}

#[tokio::test]
async fn test_health_endpoints() {
    let (addr, _handle) = spawn_bridge(false).await;
    let client = reqwest::Client::new();
    for route in ["/", "/health", "/ping"] {
        let response = client
            .get(format!("http://{addr}{route}"))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
    }
}

#[tokio::test]
async fn test_call_relays_audio_both_ways() {
    let (addr, handle) = spawn_bridge(false).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    // Transport banner, then the handshake finishes behind the scenes.
    ws.send(Message::text("event:websocket:connected"))
        .await
        .unwrap();
    handle.wait_for(|h| h.frames().len() >= 6).await;
    assert_eq!(
        handle.event_kinds()[..6].to_vec(),
        vec![
            "sessionStart",
            "promptStart",
            "contentStart",
            "textInput",
            "contentEnd",
            "contentStart",
        ]
    );

    // Caller audio lands as a base64 audioInput event.
    let pcm: Vec<u8> = b"\x00\x01".repeat(8);
    ws.send(Message::binary(pcm.clone())).await.unwrap();
    handle
        .wait_for(|h| h.event_kinds().iter().any(|k| k == "audioInput"))
        .await;
    let frames = handle.frames();
    let audio_input = frames
        .iter()
        .find(|f| f["event"].get("audioInput").is_some())
        .unwrap();
    assert_eq!(
        audio_input["event"]["audioInput"]["content"].as_str().unwrap(),
        BASE64_STANDARD.encode(&pcm)
    );

    // Assistant audio comes back as a binary frame with the decoded bytes.
    handle.push(ServerEvent::AudioOutput {
        content: BASE64_STANDARD.encode(b"assistant says hi"),
    });
    let received = loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("expected assistant audio")
            .expect("socket open")
            .unwrap()
        {
            Message::Binary(data) => break data,
            _ => continue,
        }
    };
    assert_eq!(&received[..], b"assistant says hi");

    // Hanging up tears the session down exactly once.
    ws.close(None).await.unwrap();
    handle
        .wait_for(|h| h.closed.load(Ordering::SeqCst))
        .await;
    let kinds = handle.event_kinds();
    assert_eq!(
        kinds.iter().filter(|k| k.as_str() == "sessionEnd").count(),
        1
    );
    let tail = &kinds[kinds.len() - 3..];
    assert_eq!(
        tail.to_vec(),
        vec!["contentEnd", "promptEnd", "sessionEnd"]
    );
}

#[tokio::test]
async fn test_stream_open_failure_drops_call_without_handshake() {
    let (addr, handle) = spawn_bridge(true).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    // The bridge gives up on the session and closes the call socket.
    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "socket should close after start failure");
    assert!(handle.frames().is_empty(), "no handshake events were sent");
}

#[tokio::test]
async fn test_audio_buffered_at_stream_end_still_reaches_caller() {
    let (addr, handle) = spawn_bridge(false).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    handle.wait_for(|h| h.frames().len() >= 6).await;

    // Last words arrive in the same breath as end-of-stream; teardown must
    // flush them to the caller before closing the socket.
    handle.push(ServerEvent::AudioOutput {
        content: BASE64_STANDARD.encode(b"goodbye caller"),
    });
    handle.end_stream();

    let mut flushed = false;
    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Binary(data))) => {
                    assert_eq!(&data[..], b"goodbye caller");
                    flushed = true;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "call should end when the stream ends");
    assert!(flushed, "buffered assistant audio was dropped at teardown");
}

#[tokio::test]
async fn test_inference_stream_end_closes_call() {
    let (addr, handle) = spawn_bridge(false).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    handle.wait_for(|h| h.frames().len() >= 6).await;

    // Service closes its half; the bridge should hang up on the caller.
    handle.push(ServerEvent::SessionEnd);
    handle.end_stream();

    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "call should end when the stream ends");
    handle
        .wait_for(|h| h.closed.load(Ordering::SeqCst))
        .await;
}
