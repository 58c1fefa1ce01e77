//! Shared test helpers for integration tests.

use std::net::SocketAddr;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

use sockhub_api::{AppState, build_app};
use sockhub_core::config::AppConfig;
use sockhub_core::error::AppError;
use sockhub_realtime::frame::{Frame, FrameType, decode_bytes, encode};
use sockhub_realtime::message::serializer::{decode_handshake, encode_connect_request};
use sockhub_realtime::message::{ConnectRequest, Handshake};
use sockhub_realtime::{HandlerError, RealtimeEngine};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Engine with the handlers the tests talk to.
pub fn engine(config: &AppConfig) -> RealtimeEngine {
    let engine = RealtimeEngine::new(config.realtime.clone());
    engine.on_connection(|conn| {
        conn.on("messgae", |_ctx, _data| async move { Ok(json!("hi client!")) });
        conn.on("join", |ctx, data| async move {
            let room = data
                .get("room")
                .and_then(Value::as_str)
                .ok_or_else(|| HandlerError::new("missing room"))?;
            ctx.connection.join(room)?;
            Ok(Value::Null)
        });
        conn.on("chat", |ctx, data| async move {
            let report = ctx.connection.broadcast_to("lobby", "chat", data).await?;
            Ok(json!(report.delivered))
        });
    });
    engine
}

/// Test application context
pub struct TestApp {
    /// The Axum router for making test requests
    pub router: Router,
    /// Engine behind the router
    pub realtime: RealtimeEngine,
}

impl TestApp {
    /// Create a new test application
    pub fn new() -> Self {
        let config = AppConfig::default();
        let realtime = engine(&config);
        Self::with_engine(config, realtime)
    }

    /// Create a test application around an existing engine
    pub fn with_engine(config: AppConfig, realtime: RealtimeEngine) -> Self {
        let router = build_app(AppState::new(config, realtime.clone()));
        Self { router, realtime }
    }

    /// Make an HTTP request to the test app
    pub async fn request(&self, method: &str, path: &str) -> TestResponse {
        let req = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .expect("Failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("Failed to read body");

        let body: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

        TestResponse { status, body }
    }
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Parsed JSON body
    pub body: Value,
}

/// A server listening on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub realtime: RealtimeEngine,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), AppError>>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let config = AppConfig::default();
        let realtime = engine(&config);
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("No local address");

        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(sockhub_api::serve(
            listener,
            config,
            realtime.clone(),
            async move {
                let _ = rx.await;
            },
        ));

        Self {
            addr,
            realtime,
            shutdown: Some(tx),
            task,
        }
    }

    /// Opens a WebSocket and completes the CONNECT handshake.
    pub async fn connect(&self) -> (WsClient, Handshake) {
        let url = format!("ws://{}/ws", self.addr);
        let (mut ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .expect("WebSocket connect failed");

        let hello = Frame::connect("/", encode_connect_request(&ConnectRequest::default()));
        send(&mut ws, hello).await;

        let reply = recv(&mut ws).await;
        assert_eq!(reply.frame_type, FrameType::Connect);
        let handshake = decode_handshake(&reply.payload).expect("Bad handshake payload");
        (ws, handshake)
    }

    /// In-process router sharing this server's engine.
    pub fn app(&self) -> TestApp {
        TestApp::with_engine(AppConfig::default(), self.realtime.clone())
    }

    /// Triggers graceful shutdown without waiting.
    pub fn signal_shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    /// Triggers graceful shutdown and waits for the server task.
    pub async fn stop(mut self) -> Result<(), AppError> {
        self.signal_shutdown();
        self.task.await.expect("Server task panicked")
    }
}

pub async fn send(ws: &mut WsClient, frame: Frame) {
    ws.send(Message::Binary(encode(&frame)))
        .await
        .expect("WebSocket send failed");
}

/// Next decoded frame, skipping server PINGs. Panics if the socket closes.
pub async fn recv(ws: &mut WsClient) -> Frame {
    loop {
        match ws.next().await {
            Some(Ok(Message::Binary(data))) => {
                let frame = decode_bytes(data).expect("Server sent a malformed frame");
                if frame.frame_type != FrameType::Ping {
                    return frame;
                }
            }
            Some(Ok(Message::Close(_))) | None => panic!("WebSocket closed"),
            Some(Ok(_)) => {}
            Some(Err(e)) => panic!("WebSocket error: {e}"),
        }
    }
}
