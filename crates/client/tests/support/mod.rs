// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process stub of the clinic realtime server.
//!
//! Tests script it from the outside: push frames to the live connection,
//! close with a chosen code, fail the next N connections on accept, and
//! inspect everything the client sent.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::broadcast;

/// Command pushed from the test body to live connections.
#[derive(Debug, Clone)]
enum Command {
    Frame(String),
    Close(u16),
}

#[derive(Debug, Clone, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// Close the first `remaining` accepted connections with `code`.
struct FailPlan {
    remaining: usize,
    code: u16,
}

struct StubState {
    auth_token: Option<String>,
    command_tx: broadcast::Sender<Command>,
    accepted: AtomicUsize,
    received: Mutex<Vec<serde_json::Value>>,
    closes: Mutex<Vec<Option<u16>>>,
    fail_plan: Mutex<Option<FailPlan>>,
}

pub struct StubServer {
    addr: SocketAddr,
    state: Arc<StubState>,
    handle: tokio::task::JoinHandle<()>,
}

impl StubServer {
    /// Spawn the server on a random port. When `auth_token` is set, a
    /// connection without the matching `?token=` query param is rejected
    /// with 401 before the upgrade.
    pub async fn spawn(auth_token: Option<&str>) -> anyhow::Result<Self> {
        let (command_tx, _) = broadcast::channel(64);
        let state = Arc::new(StubState {
            auth_token: auth_token.map(str::to_owned),
            command_tx,
            accepted: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
            fail_plan: Mutex::new(None),
        });

        let router =
            Router::new().route("/ws", get(ws_handler)).with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self { addr, state, handle })
    }

    /// Endpoint URL for the client config.
    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Queue a frame for the live connection.
    pub fn push(&self, frame: serde_json::Value) {
        self.push_text(frame.to_string());
    }

    /// Queue raw text (for malformed-frame tests).
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.state.command_tx.send(Command::Frame(text.into()));
    }

    /// Close the live connection with the given close code.
    pub fn close_with(&self, code: u16) {
        let _ = self.state.command_tx.send(Command::Close(code));
    }

    /// Close the next `n` accepted connections with `code` immediately.
    pub fn fail_next(&self, n: usize, code: u16) {
        *self.state.fail_plan.lock() = Some(FailPlan { remaining: n, code });
    }

    /// Total connections accepted since startup.
    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::Relaxed)
    }

    /// Frames received from clients, oldest first.
    pub fn received(&self) -> Vec<serde_json::Value> {
        self.state.received.lock().clone()
    }

    /// Received frames with the given wire `type`.
    pub fn received_of_kind(&self, kind: &str) -> usize {
        self.received()
            .iter()
            .filter(|frame| frame.get("type").and_then(|t| t.as_str()) == Some(kind))
            .count()
    }

    /// Close codes received from clients (None = close without a code).
    pub fn client_close_codes(&self) -> Vec<Option<u16>> {
        self.state.closes.lock().clone()
    }

    /// Wait until at least `n` connections were accepted.
    pub async fn wait_for_accepted(&self, n: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.accepted() >= n).await
    }

    /// Wait until at least `n` frames of `kind` arrived.
    pub async fn wait_for_kind(&self, kind: &str, n: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.received_of_kind(kind) >= n).await
    }

    /// Tear the server down, refusing all further connections.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// Poll `predicate` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn ws_handler(
    State(state): State<Arc<StubState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if let Some(ref expected) = state.auth_token {
        if query.token.as_deref() != Some(expected.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_connection(state, socket)).into_response()
}

async fn handle_connection(state: Arc<StubState>, mut socket: WebSocket) {
    // Subscribe before bumping the counter so a push right after
    // `wait_for_accepted` cannot be missed.
    let mut command_rx = state.command_tx.subscribe();
    state.accepted.fetch_add(1, Ordering::Relaxed);

    // Scripted failure: close immediately with the planned code.
    let fail_code = {
        let mut plan = state.fail_plan.lock();
        match plan.as_mut() {
            Some(p) if p.remaining > 0 => {
                p.remaining -= 1;
                Some(p.code)
            }
            _ => None,
        }
    };
    if let Some(code) = fail_code {
        let frame = CloseFrame { code, reason: "scripted failure".into() };
        let _ = socket.send(Message::Close(Some(frame))).await;
        return;
    }

    loop {
        tokio::select! {
            cmd = command_rx.recv() => match cmd {
                Ok(Command::Frame(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(Command::Close(code)) => {
                    let frame = CloseFrame { code, reason: "test close".into() };
                    let _ = socket.send(Message::Close(Some(frame))).await;
                    break;
                }
                Err(_) => continue,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str(&text) {
                        state.received.lock().push(value);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    state.closes.lock().push(frame.map(|f| f.code));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
        }
    }
}
