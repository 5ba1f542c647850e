// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Realtime connection manager: lifecycle, authentication, heartbeat,
//! bounded reconnection and event fan-out.
//!
//! One explicitly-constructed [`ConnectionManager`] per process, owned by
//! the application root. The manager owns at most one live WebSocket at a
//! time. Collaborators drive it through `connect`/`disconnect`/`on`/`off`
//! and the read-only snapshots; ordinary network failure is never returned
//! as an error, only reported through state and events.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::RealtimeConfig;
use crate::dispatch::{Callback, Dispatcher, SubscriptionId};
use crate::error::{ConnectionFailure, FailureKind};
use crate::events::{CloseInfo, EventKind, RealtimeEvent};
use crate::protocol::{self, ClientFrame, DecodeOutcome};
use crate::token::TokenStore;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only diagnostic snapshot returned by
/// [`ConnectionManager::debug_info`].
#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    pub state: ConnectionState,
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub url: String,
    pub heartbeat_interval_ms: u64,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    /// Event kinds with at least one subscriber.
    pub subscribed_events: Vec<EventKind>,
}

/// Handle of the live session chain. Cancelling the token is the single
/// cancellation primitive: it covers the heartbeat interval, any pending
/// reconnect delay and the socket read in one shot.
struct SessionHandle {
    cancel: CancellationToken,
    generation: u64,
}

struct Shared {
    config: RealtimeConfig,
    tokens: Arc<dyn TokenStore>,
    dispatcher: Dispatcher,
    state: Mutex<ConnectionState>,
    /// True while the transport socket reports open.
    socket_open: AtomicBool,
    /// Reconnection attempts since the last successful open.
    attempts: AtomicU32,
    /// The live session chain, if any. Doubles as the at-most-one-socket
    /// guard: `connect` reserves this slot before its first await.
    session: Mutex<Option<SessionHandle>>,
    generation: AtomicU64,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if *state != next {
            trace!(from = %*state, to = %next, "connection state");
            *state = next;
        }
    }

    /// Reserve the session slot, or return `None` when a session is
    /// already live or in flight.
    fn try_reserve(&self) -> Option<(CancellationToken, u64)> {
        let mut session = self.session.lock();
        if session.is_some() {
            return None;
        }
        let cancel = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        *session = Some(SessionHandle { cancel: cancel.clone(), generation });
        Some((cancel, generation))
    }

    /// Clear the session slot, unless a newer session already took it.
    ///
    /// An empty slot means `disconnect()` took it mid-attempt; its
    /// disconnected state is reasserted here so a late `connecting` write
    /// from the racing attempt cannot survive the teardown.
    fn release_session(&self, generation: u64) {
        let mut session = self.session.lock();
        match session.as_ref() {
            Some(handle) if handle.generation == generation => *session = None,
            Some(_) => {}
            None => self.set_state(ConnectionState::Disconnected),
        }
    }
}

/// Owner of the realtime connection lifecycle.
pub struct ConnectionManager {
    inner: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(config: RealtimeConfig, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            inner: Arc::new(Shared {
                config,
                tokens,
                dispatcher: Dispatcher::new(),
                state: Mutex::new(ConnectionState::Disconnected),
                socket_open: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Open the realtime connection.
    ///
    /// Idempotent: while a connection is live or an attempt is in flight
    /// this is a logged no-op. A missing bearer token moves the state to
    /// `error` and warns; no socket is opened and nothing is raised.
    pub async fn connect(&self) {
        let Some((cancel, generation)) = self.inner.try_reserve() else {
            debug!("connect ignored, session already live or in flight");
            return;
        };

        let token = self.inner.tokens.bearer_token().await;

        // A disconnect() may have taken the slot while the token read was
        // pending; its state stands.
        if cancel.is_cancelled() {
            debug!("connect abandoned, disconnected during the token read");
            self.inner.release_session(generation);
            return;
        }

        let Some(token) = token else {
            warn!(
                reason = %FailureKind::Credential,
                "no bearer token available, realtime connection aborted"
            );
            self.inner.set_state(ConnectionState::Error);
            self.inner.release_session(generation);
            return;
        };

        self.inner.set_state(ConnectionState::Connecting);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_session(inner, token, cancel, generation).await;
        });
    }

    /// Tear down the connection.
    ///
    /// Synchronous and idempotent. Cancelling the session handle stops the
    /// heartbeat interval and any pending reconnect delay before this
    /// returns; the session task sends a normal-closure (1000) frame on
    /// its way out.
    pub fn disconnect(&self) {
        let handle = self.inner.session.lock().take();
        match handle {
            Some(handle) => {
                handle.cancel.cancel();
                info!("realtime disconnect requested");
            }
            None => debug!("disconnect ignored, no live session"),
        }
        self.inner.socket_open.store(false, Ordering::Relaxed);
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// Register `callback` for `kind`, appended after existing
    /// subscribers. Registering the same closure twice keeps both.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        self.inner.dispatcher.subscribe(kind, Arc::new(callback) as Callback)
    }

    /// Remove one prior registration. Unknown handles are a no-op.
    pub fn off(&self, kind: EventKind, id: SubscriptionId) {
        self.inner.dispatcher.unsubscribe(kind, id);
    }

    /// True iff the transport socket exists and reports open.
    pub fn is_connected(&self) -> bool {
        self.inner.socket_open.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Read-only diagnostic snapshot. Never mutates manager state.
    pub fn debug_info(&self) -> DebugInfo {
        DebugInfo {
            state: self.status(),
            connected: self.is_connected(),
            reconnect_attempts: self.inner.attempts.load(Ordering::Relaxed),
            url: self.inner.config.url.clone(),
            heartbeat_interval_ms: self.inner.config.heartbeat_interval.as_millis() as u64,
            reconnect_delay_ms: self.inner.config.reconnect_delay.as_millis() as u64,
            max_reconnect_attempts: self.inner.config.max_reconnect_attempts,
            subscribed_events: self.inner.dispatcher.subscribed_kinds(),
        }
    }

    /// Probe connectivity.
    ///
    /// Returns `false` immediately when no token is available, `true`
    /// immediately when already connected. Otherwise triggers
    /// [`connect`](Self::connect) and polls the state every `probe_poll`:
    /// `connected` resolves to `true`, `error` to `false`, and `false`
    /// once `probe_timeout` elapses.
    pub async fn test_connection(&self) -> bool {
        if self.inner.tokens.bearer_token().await.is_none() {
            debug!("probe failed, no bearer token");
            return false;
        }
        if self.is_connected() {
            return true;
        }

        self.connect().await;

        let deadline = tokio::time::Instant::now() + self.inner.config.probe_timeout;
        loop {
            match self.status() {
                ConnectionState::Connected => return true,
                ConnectionState::Error => return false,
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                debug!("probe timed out");
                return false;
            }
            tokio::time::sleep(self.inner.config.probe_poll).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

/// How one live socket ended.
enum SessionEnd {
    /// `disconnect()` was called; a 1000 close frame was sent.
    LocalClose,
    /// The server closed the socket (or the stream ended).
    RemoteClose { code: u16, reason: String },
    /// Transport-level failure mid-stream.
    Failed(ConnectionFailure),
}

/// Run one connection chain: connect, pump, and retry with a fixed delay
/// until the close is deliberate, the attempts run out, or the token is
/// gone. Exactly one chain exists per reserved session slot.
async fn run_session(
    inner: Arc<Shared>,
    first_token: String,
    cancel: CancellationToken,
    generation: u64,
) {
    let mut token = first_token;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let url = ws_url(&inner.config.url, &token);
        inner.set_state(ConnectionState::Connecting);

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = tokio_tungstenite::connect_async(&url) => result,
        };

        match connected {
            Ok((stream, _)) => {
                // Successful open resets the attempt budget.
                inner.attempts.store(0, Ordering::Relaxed);
                inner.socket_open.store(true, Ordering::Relaxed);
                inner.set_state(ConnectionState::Connected);
                info!(url = %inner.config.url, "realtime connected");
                inner.dispatcher.emit(&RealtimeEvent::ConnectionOpen);

                let end = drive(&inner, stream, &cancel).await;
                inner.socket_open.store(false, Ordering::Relaxed);

                match end {
                    SessionEnd::LocalClose => {
                        // State was already set by disconnect().
                        inner.dispatcher.emit(&RealtimeEvent::ConnectionClose(CloseInfo {
                            code: protocol::CLOSE_NORMAL,
                            reason: "client disconnect".to_owned(),
                        }));
                        break;
                    }
                    SessionEnd::RemoteClose { code, reason } => {
                        inner.set_state(ConnectionState::Disconnected);
                        let normal = protocol::is_normal_close(code);
                        if normal {
                            info!(code, reason = %reason, "realtime connection closed");
                        } else {
                            warn!(
                                code,
                                reason = %FailureKind::AbnormalClose,
                                detail = %reason,
                                "realtime connection closed abnormally"
                            );
                        }
                        inner
                            .dispatcher
                            .emit(&RealtimeEvent::ConnectionClose(CloseInfo { code, reason }));
                        if normal {
                            debug!("normal closure, not reconnecting");
                            break;
                        }
                    }
                    SessionEnd::Failed(failure) => {
                        inner.set_state(ConnectionState::Error);
                        warn!(reason = %failure, "realtime transport error");
                        inner.dispatcher.emit(&RealtimeEvent::ConnectionError(failure));
                    }
                }
            }
            Err(e) => {
                let failure =
                    ConnectionFailure::new(FailureKind::Transport, format!("connect failed: {e}"));
                inner.set_state(ConnectionState::Error);
                warn!(reason = %failure, "realtime connect failed");
                inner.dispatcher.emit(&RealtimeEvent::ConnectionError(failure));
            }
        }

        // Reconnect policy: fixed delay, bounded attempts, token re-check.
        // The counter increments exactly once per retry, at the moment the
        // retry begins.
        let attempts = inner.attempts.load(Ordering::Relaxed);
        if attempts >= inner.config.max_reconnect_attempts {
            warn!(
                attempts,
                reason = %FailureKind::RetriesExhausted,
                "reconnect attempts exhausted, waiting for an explicit connect()"
            );
            inner.set_state(ConnectionState::Disconnected);
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(inner.config.reconnect_delay) => {}
        }

        match inner.tokens.bearer_token().await {
            Some(fresh) => {
                token = fresh;
                let attempt = inner.attempts.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(attempt, max = inner.config.max_reconnect_attempts, "reconnecting");
            }
            None => {
                warn!(
                    reason = %FailureKind::Credential,
                    "bearer token gone, abandoning reconnection"
                );
                inner.set_state(ConnectionState::Disconnected);
                break;
            }
        }
    }

    inner.socket_open.store(false, Ordering::Relaxed);
    inner.release_session(generation);
}

/// Pump one live socket until it ends: heartbeats out, frames in.
///
/// The interval's first tick fires immediately, which doubles as the
/// heartbeat sent right after open.
async fn drive(inner: &Shared, stream: WsStream, cancel: &CancellationToken) -> SessionEnd {
    let (mut tx, mut rx) = stream.split();
    let mut heartbeat = tokio::time::interval(inner.config.heartbeat_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let frame = CloseFrame { code: CloseCode::Normal, reason: "client disconnect".into() };
                let _ = tx.send(Message::Close(Some(frame))).await;
                return SessionEnd::LocalClose;
            }
            _ = heartbeat.tick() => {
                if let Err(failure) = send_frame(&mut tx, &ClientFrame::heartbeat()).await {
                    return SessionEnd::Failed(failure);
                }
            }
            msg = rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Err(failure) = handle_frame(inner, &mut tx, text.as_str()).await {
                        return SessionEnd::Failed(failure);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                        // Close without a status code (RFC 6455 1005).
                        None => (1005, String::new()),
                    };
                    return SessionEnd::RemoteClose { code, reason };
                }
                // Binary frames and transport-level ping/pong are not part
                // of the protocol.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return SessionEnd::Failed(
                        ConnectionFailure::new(FailureKind::Transport, e.to_string()),
                    );
                }
                None => {
                    // Stream ended without a close frame.
                    return SessionEnd::RemoteClose { code: 1006, reason: String::new() };
                }
            }
        }
    }
}

/// Decode one inbound frame and act on it. Only transport failures (a
/// heartbeat reply that cannot be sent) end the session; undecodable and
/// unknown frames are logged and dropped.
async fn handle_frame(
    inner: &Shared,
    tx: &mut WsSink,
    text: &str,
) -> Result<(), ConnectionFailure> {
    match protocol::decode(text) {
        DecodeOutcome::Event(event) => {
            trace!(kind = %event.kind(), "dispatching realtime event");
            inner.dispatcher.emit(&event);
        }
        DecodeOutcome::Heartbeat => {
            trace!("server heartbeat, replying");
            send_frame(tx, &ClientFrame::heartbeat()).await?;
        }
        DecodeOutcome::HeartbeatAck => {
            trace!("heartbeat acknowledged by server");
        }
        DecodeOutcome::Unknown(kind) => {
            warn!(kind = %kind, "unrecognized frame kind, dropping");
        }
        DecodeOutcome::Malformed(detail) => {
            warn!(reason = %FailureKind::Decode, detail = %detail, "undecodable frame, dropping");
        }
    }
    Ok(())
}

/// Serialize and send one outbound frame.
async fn send_frame(tx: &mut WsSink, frame: &ClientFrame) -> Result<(), ConnectionFailure> {
    let text = serde_json::to_string(frame)
        .map_err(|e| ConnectionFailure::new(FailureKind::Transport, format!("encode frame: {e}")))?;
    tx.send(Message::Text(text.into()))
        .await
        .map_err(|e| ConnectionFailure::new(FailureKind::Transport, format!("send frame: {e}")))
}

/// Build the connection URL: convert http(s) to ws(s) and append the
/// bearer token as a query parameter.
fn ws_url(base: &str, token: &str) -> String {
    let ws_base = if base.starts_with("https://") {
        base.replacen("https://", "wss://", 1)
    } else if base.starts_with("http://") {
        base.replacen("http://", "ws://", 1)
    } else {
        base.to_owned()
    };

    let sep = if ws_base.contains('?') { '&' } else { '?' };
    format!("{ws_base}{sep}token={token}")
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
