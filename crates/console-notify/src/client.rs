//! Auto-reconnecting notification stream
//!
//! `NotificationClient` owns at most one channel task at a time. Connection
//! bookkeeping lives in a single `StreamConnection` behind a short-held lock:
//!
//! - `connect` records the token and, when idle, spawns a channel task
//! - the channel task decodes frames until the channel ends, then reports the
//!   close tagged with its generation
//! - a close from the current generation with no manual-close intent and a
//!   tracked token schedules exactly one reconnect after `reconnect_delay`
//! - `disconnect` sets manual-close intent, cancels the timer and tells the
//!   channel task to send a close frame
//!
//! Closes reported by a superseded generation are ignored, so a slow-dying
//! channel cannot schedule a reconnect on behalf of its successor.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use common::Secret;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::metrics;
use crate::sink::NotificationSink;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Path of the push endpoint relative to the backend host
const STREAM_PATH: &str = "/ws/notification";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Push endpoint without the token, e.g. `ws://localhost:8080/ws/notification`
    pub url: String,
    pub reconnect_delay: Duration,
}

impl StreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Derive the push endpoint from the API base URL: same host and port,
/// `ws` for `http` and `wss` for `https`.
pub fn stream_url_from_api_base(api_base: &str) -> Result<String> {
    let base = Url::parse(api_base)
        .map_err(|e| Error::InvalidUrl(format!("{api_base}: {e}")))?;
    let scheme = match base.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(Error::InvalidUrl(format!(
                "{api_base}: unsupported scheme {other}"
            )));
        }
    };
    let host = base
        .host_str()
        .ok_or_else(|| Error::InvalidUrl(format!("{api_base}: missing host")))?;
    let port = base.port().map(|p| format!(":{p}")).unwrap_or_default();
    Ok(format!("{scheme}://{host}{port}{STREAM_PATH}"))
}

/// Lifecycle of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
}

struct StreamConnection {
    state: ConnectionState,
    manual_close: bool,
    /// Token used for the next (re)connect
    token: Option<Secret<String>>,
    /// Incremented for every channel task; tags close reports
    generation: u64,
    shutdown: Option<oneshot::Sender<()>>,
    reconnect: Option<JoinHandle<()>>,
}

struct ClientInner {
    url: Url,
    reconnect_delay: Duration,
    sink: Arc<dyn NotificationSink>,
    conn: Mutex<StreamConnection>,
}

/// Client for the backend's notification push endpoint.
///
/// `connect` and `disconnect` spawn onto the ambient tokio runtime and must be
/// called from within one.
#[derive(Clone)]
pub struct NotificationClient {
    inner: Arc<ClientInner>,
}

impl NotificationClient {
    pub fn new(config: StreamConfig, sink: Arc<dyn NotificationSink>) -> Result<Self> {
        let url = Url::parse(&config.url)
            .map_err(|e| Error::InvalidUrl(format!("{}: {e}", config.url)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::InvalidUrl(format!(
                "{}: expected ws or wss scheme",
                config.url
            )));
        }
        if config.reconnect_delay.is_zero() {
            return Err(Error::InvalidUrl(
                "reconnect delay must be greater than 0".into(),
            ));
        }

        Ok(Self {
            inner: Arc::new(ClientInner {
                url,
                reconnect_delay: config.reconnect_delay,
                sink,
                conn: Mutex::new(StreamConnection {
                    state: ConnectionState::Idle,
                    manual_close: false,
                    token: None,
                    generation: 0,
                    shutdown: None,
                    reconnect: None,
                }),
            }),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Open the channel with `token`, unless one is already connecting or
    /// open. The token is remembered either way and used by later reconnects.
    pub fn connect(&self, token: &str) {
        if token.is_empty() {
            debug!("ignoring connect without a token");
            return;
        }
        let mut conn = self.lock();
        self.connect_locked(&mut conn, Secret::from(token));
    }

    /// Close the channel and stop reconnecting until the next `connect`.
    pub fn disconnect(&self) {
        let mut conn = self.lock();
        conn.manual_close = true;
        conn.token = None;
        if let Some(timer) = conn.reconnect.take() {
            timer.abort();
        }
        if let Some(shutdown) = conn.shutdown.take() {
            let _ = shutdown.send(());
        }
        if conn.state != ConnectionState::Idle {
            info!("notification stream disconnected");
        }
        conn.state = ConnectionState::Idle;
    }

    fn connect_locked(&self, conn: &mut StreamConnection, token: Secret<String>) {
        conn.token = Some(token.clone());
        if conn.state != ConnectionState::Idle {
            debug!(state = ?conn.state, "notification stream already active");
            return;
        }

        conn.manual_close = false;
        if let Some(timer) = conn.reconnect.take() {
            timer.abort();
        }
        conn.generation += 1;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        conn.shutdown = Some(shutdown_tx);
        conn.state = ConnectionState::Connecting;

        let mut url = self.inner.url.clone();
        url.query_pairs_mut().append_pair("token", token.expose());
        tokio::spawn(self.clone().run(conn.generation, url, shutdown_rx));
    }

    async fn run(self, generation: u64, url: Url, mut shutdown: oneshot::Receiver<()>) {
        info!(endpoint = %self.inner.url, generation, "connecting notification stream");

        let opened = tokio::select! {
            result = open_channel(&url) => result,
            _ = &mut shutdown => {
                debug!(generation, "disconnect requested while connecting");
                return;
            }
        };
        let mut ws = match opened {
            Ok(ws) => ws,
            Err(e) => {
                warn!(error = %e, generation, "notification stream connection failed");
                metrics::record_connection("failed");
                self.on_closed(generation);
                return;
            }
        };
        if !self.mark_open(generation) {
            let _ = ws.close(None).await;
            return;
        }
        metrics::record_connection("opened");
        info!(generation, "notification stream open");

        loop {
            tokio::select! {
                message = ws.next() => match message {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "server closed notification stream");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, generation, "notification stream error");
                        break;
                    }
                    None => break,
                },
                _ = &mut shutdown => {
                    if let Err(e) = ws.close(None).await {
                        debug!(error = %e, "close handshake failed");
                    }
                    return;
                }
            }
        }

        info!(generation, "notification stream closed");
        self.on_closed(generation);
    }

    fn handle_text(&self, text: &str) {
        let Some(frame) = Frame::parse(text) else {
            debug!(len = text.len(), "ignoring malformed frame");
            metrics::record_frame("malformed");
            return;
        };
        metrics::record_frame(frame.kind());
        match frame.into_toast() {
            Some(toast) => self.inner.sink.notify(toast),
            None => debug!("frame produced no notification"),
        }
    }

    fn mark_open(&self, generation: u64) -> bool {
        let mut conn = self.lock();
        if conn.generation != generation || conn.state != ConnectionState::Connecting {
            debug!(generation, "channel superseded before it opened");
            return false;
        }
        conn.state = ConnectionState::Open;
        true
    }

    fn on_closed(&self, generation: u64) {
        let mut conn = self.lock();
        if conn.generation != generation {
            debug!(generation, current = conn.generation, "ignoring close of superseded channel");
            return;
        }
        conn.state = ConnectionState::Idle;
        conn.shutdown = None;
        if conn.manual_close || conn.token.is_none() {
            return;
        }

        if let Some(timer) = conn.reconnect.take() {
            timer.abort();
        }
        let delay = self.inner.reconnect_delay;
        info!(delay_ms = delay.as_millis() as u64, "notification stream lost, reconnect scheduled");
        metrics::record_reconnect_scheduled();

        let client = self.clone();
        conn.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            client.reconnect_due(generation);
        }));
    }

    /// Timer expiry for the channel `generation`. A timer that woke after a
    /// newer channel was started leaves that channel and its timer alone.
    fn reconnect_due(&self, generation: u64) {
        let mut conn = self.lock();
        if conn.generation != generation || conn.state != ConnectionState::Idle {
            debug!(generation, current = conn.generation, "ignoring superseded reconnect timer");
            return;
        }
        conn.reconnect = None;
        if conn.manual_close {
            return;
        }
        if let Some(token) = conn.token.clone() {
            self.connect_locked(&mut conn, token);
        }
    }

    fn lock(&self) -> MutexGuard<'_, StreamConnection> {
        self.inner.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn open_channel(url: &Url) -> Result<WsStream> {
    let (ws, response) = connect_async(url.as_str()).await?;
    debug!(status = response.status().as_u16(), "notification stream handshake complete");
    Ok(ws)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Router;
    use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
    use axum::extract::{Query, State};
    use axum::response::Response;
    use axum::routing::get;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use crate::frame::{Severity, Toast};
    use crate::sink::ChannelSink;

    /// Mock push endpoint. Sends `frames` on every connection, then either
    /// drops the socket or holds it until the client closes.
    struct PushServer {
        frames: Vec<String>,
        drop_after_frames: bool,
        connections: AtomicUsize,
        close_frames: AtomicUsize,
        tokens: Mutex<Vec<String>>,
    }

    async fn push(
        ws: WebSocketUpgrade,
        Query(params): Query<HashMap<String, String>>,
        State(server): State<Arc<PushServer>>,
    ) -> Response {
        server.connections.fetch_add(1, Ordering::SeqCst);
        server
            .tokens
            .lock()
            .unwrap()
            .push(params.get("token").cloned().unwrap_or_default());
        ws.on_upgrade(move |socket| serve_socket(socket, server))
    }

    async fn serve_socket(mut socket: WebSocket, server: Arc<PushServer>) {
        for frame in &server.frames {
            if socket
                .send(WsMessage::Text(frame.clone().into()))
                .await
                .is_err()
            {
                return;
            }
        }
        if server.drop_after_frames {
            return;
        }
        while let Some(Ok(message)) = socket.recv().await {
            if let WsMessage::Close(_) = message {
                server.close_frames.fetch_add(1, Ordering::SeqCst);
                break;
            }
        }
    }

    async fn start_push_server(frames: &[&str], drop_after_frames: bool) -> (String, Arc<PushServer>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(PushServer {
            frames: frames.iter().map(|f| f.to_string()).collect(),
            drop_after_frames,
            connections: AtomicUsize::new(0),
            close_frames: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/ws/notification", get(push))
            .with_state(server.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("ws://{addr}/ws/notification"), server)
    }

    fn client(url: &str, delay: Duration) -> (NotificationClient, mpsc::Receiver<Toast>) {
        let (sink, rx) = ChannelSink::new(16);
        let config = StreamConfig::new(url).with_reconnect_delay(delay);
        (NotificationClient::new(config, Arc::new(sink)).unwrap(), rx)
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn next_toast(rx: &mut mpsc::Receiver<Toast>) -> Toast {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no notification in time")
            .expect("sink closed")
    }

    fn failed_connections(rendered: &str) -> u64 {
        rendered
            .lines()
            .find_map(|line| line.strip_prefix("notify_connections_total{outcome=\"failed\"} "))
            .and_then(|count| count.trim().parse().ok())
            .unwrap_or(0)
    }

    const DEPLOY: &str =
        r#"{"type":"notification","data":{"id":"1","title":"Deploy","content":"v2 is live"}}"#;

    #[tokio::test]
    async fn notification_frame_produces_one_toast() {
        let (url, server) = start_push_server(&[DEPLOY], false).await;
        let (client, mut rx) = client(&url, Duration::from_secs(2));

        client.connect("A1");
        let toast = next_toast(&mut rx).await;
        assert_eq!(toast.title, "Deploy");
        assert_eq!(toast.body, "v2 is live");
        assert_eq!(toast.severity, Severity::Success);
        assert_eq!(toast.duration, Duration::from_secs(5));

        assert!(
            tokio::time::timeout(Duration::from_millis(200), rx.recv())
                .await
                .is_err()
        );
        assert_eq!(*server.tokens.lock().unwrap(), vec!["A1".to_string()]);
        client.disconnect();
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_produce_nothing() {
        let last = r#"{"type":"notification","data":{"title":"last"}}"#;
        let (url, _server) = start_push_server(
            &["not json", r#"{"type":"heartbeat"}"#, r#"{"type":"init","data":[]}"#, last],
            false,
        )
        .await;
        let (client, mut rx) = client(&url, Duration::from_secs(2));

        client.connect("A1");
        assert_eq!(next_toast(&mut rx).await.title, "last");
        client.disconnect();
    }

    #[tokio::test]
    async fn unread_backlog_is_aggregated() {
        let (url, _server) =
            start_push_server(&[r#"{"type":"init","data":[{"id":"1"},{"id":"2"}]}"#], false).await;
        let (client, mut rx) = client(&url, Duration::from_secs(2));

        client.connect("A1");
        let toast = next_toast(&mut rx).await;
        assert_eq!(toast.body, "You have 2 unread notifications");
        assert_eq!(toast.severity, Severity::Info);
        client.disconnect();
    }

    #[tokio::test]
    async fn repeated_connect_keeps_one_channel() {
        let (url, server) = start_push_server(&[], false).await;
        let (client, _rx) = client(&url, Duration::from_secs(2));

        client.connect("A1");
        client.connect("A1");
        client.connect("A1");
        eventually(|| client.state() == ConnectionState::Open).await;
        client.connect("A1");
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(server.connections.load(Ordering::SeqCst), 1);
        client.disconnect();
    }

    #[tokio::test]
    async fn dropped_channel_reconnects_until_disconnect() {
        let (url, server) = start_push_server(&[], true).await;
        let (client, _rx) = client(&url, Duration::from_millis(100));

        client.connect("A1");
        eventually(|| server.connections.load(Ordering::SeqCst) >= 3).await;

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Idle);
        tokio::time::sleep(Duration::from_millis(300)).await;
        let settled = server.connections.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(server.connections.load(Ordering::SeqCst), settled);
        assert!(server.tokens.lock().unwrap().iter().all(|t| t == "A1"));
    }

    #[tokio::test]
    async fn reconnect_uses_most_recent_token() {
        let (url, server) = start_push_server(&[], true).await;
        let (client, _rx) = client(&url, Duration::from_millis(100));

        client.connect("A1");
        eventually(|| server.connections.load(Ordering::SeqCst) >= 1).await;
        client.connect("A2");
        eventually(|| server.tokens.lock().unwrap().iter().any(|t| t == "A2")).await;
        client.disconnect();

        let tokens = server.tokens.lock().unwrap().clone();
        let first_a2 = tokens.iter().position(|t| t == "A2").unwrap();
        assert!(tokens[first_a2..].iter().all(|t| t == "A2"), "{tokens:?}");
    }

    #[tokio::test]
    async fn superseded_reconnect_timer_is_ignored() {
        let (url, server) = start_push_server(&[], false).await;
        let (client, _rx) = client(&url, Duration::from_secs(60));

        let pending = tokio::spawn(std::future::pending::<()>());
        {
            let mut conn = client.lock();
            conn.token = Some(Secret::from("A1"));
            conn.generation = 3;
            conn.reconnect = Some(pending);
        }

        client.reconnect_due(2);
        {
            let conn = client.lock();
            assert_eq!(conn.state, ConnectionState::Idle);
            assert_eq!(conn.generation, 3);
            assert!(conn.reconnect.is_some());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.connections.load(Ordering::SeqCst), 0);

        client.reconnect_due(3);
        assert!(client.lock().reconnect.is_none());
        eventually(|| client.state() == ConnectionState::Open).await;
        assert_eq!(*server.tokens.lock().unwrap(), vec!["A1".to_string()]);
        client.disconnect();
    }

    #[tokio::test]
    async fn disconnect_sends_close_frame() {
        let (url, server) = start_push_server(&[], false).await;
        let (client, _rx) = client(&url, Duration::from_millis(100));

        client.connect("A1");
        eventually(|| client.state() == ConnectionState::Open).await;
        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Idle);

        eventually(|| server.close_frames.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(server.connections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_endpoint_keeps_retrying() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = ::metrics::set_default_local_recorder(&recorder);

        let (client, _rx) = client(&format!("ws://{addr}/ws/notification"), Duration::from_millis(50));
        client.connect("A1");
        eventually(|| failed_connections(&handle.render()) >= 3).await;
        client.disconnect();
        assert!(handle.render().contains("notify_reconnects_scheduled_total"));
    }

    #[tokio::test]
    async fn empty_token_is_ignored() {
        let (client, _rx) = client("ws://127.0.0.1:9/ws/notification", Duration::from_secs(2));
        client.connect("");
        assert_eq!(client.state(), ConnectionState::Idle);
    }

    #[test]
    fn rejects_non_websocket_urls() {
        let sink: Arc<dyn NotificationSink> = Arc::new(crate::sink::TracingSink);
        let err = NotificationClient::new(StreamConfig::new("http://localhost/ws"), sink.clone());
        assert!(matches!(err, Err(Error::InvalidUrl(_))));

        let err = NotificationClient::new(
            StreamConfig::new("ws://localhost/ws").with_reconnect_delay(Duration::ZERO),
            sink,
        );
        assert!(matches!(err, Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn stream_url_follows_api_scheme_and_host() {
        assert_eq!(
            stream_url_from_api_base("http://localhost:8080/api").unwrap(),
            "ws://localhost:8080/ws/notification"
        );
        assert_eq!(
            stream_url_from_api_base("https://console.example.com/api").unwrap(),
            "wss://console.example.com/ws/notification"
        );
        assert!(matches!(
            stream_url_from_api_base("ftp://example.com"),
            Err(Error::InvalidUrl(_))
        ));
        assert!(stream_url_from_api_base("/api").is_err());
    }
}
