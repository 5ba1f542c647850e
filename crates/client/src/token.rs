// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer-token storage for realtime authentication.
//!
//! The connection manager holds no copy of the credential beyond the
//! current attempt: it re-reads the store before every `connect()` and
//! before every scheduled reconnection. Every storage failure collapses to
//! an absent token, which aborts the attempt without raising.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Source of the bearer token used in the connection handshake.
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    /// Current bearer token, or `None` when absent, unreadable or expired.
    async fn bearer_token(&self) -> Option<String>;

    /// Drop the stored credential (e.g. after the server rejects it).
    async fn clear(&self);
}

// ---------------------------------------------------------------------------
// StaticTokenStore
// ---------------------------------------------------------------------------

/// In-memory token slot. Used by the CLI `--token` flag and by tests to
/// simulate the credential disappearing mid-session.
#[derive(Default)]
pub struct StaticTokenStore {
    token: Mutex<Option<String>>,
}

impl StaticTokenStore {
    pub fn new(token: Option<String>) -> Self {
        Self { token: Mutex::new(token) }
    }

    /// Replace the stored token.
    pub fn set(&self, token: impl Into<String>) {
        *self.token.lock() = Some(token.into());
    }
}

#[async_trait::async_trait]
impl TokenStore for StaticTokenStore {
    async fn bearer_token(&self) -> Option<String> {
        self.token.lock().clone()
    }

    async fn clear(&self) {
        *self.token.lock() = None;
    }
}

// ---------------------------------------------------------------------------
// FileTokenStore
// ---------------------------------------------------------------------------

/// Credential file contents:
/// `{"token": "...", "expiresAt": 1770982078349}` with `expiresAt` in
/// milliseconds since the Unix epoch, optional.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedToken {
    token: String,
    #[serde(
        default,
        rename = "expiresAt",
        skip_serializing_if = "Option::is_none"
    )]
    expires_at_ms: Option<u64>,
}

/// Persisted credential file.
///
/// Reads tolerate a missing, unreadable or expired file (all read as
/// absent); writes are atomic (tmp file then rename).
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Persist a token, replacing any previous one.
    pub fn store(&self, token: &str, expires_at_ms: Option<u64>) -> anyhow::Result<()> {
        let persisted = PersistedToken { token: token.to_owned(), expires_at_ms };
        let json = serde_json::to_string_pretty(&persisted)?;

        let tmp = self.path.with_extension("tmp");
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), "credential persisted");
        Ok(())
    }
}

#[async_trait::async_trait]
impl TokenStore for FileTokenStore {
    async fn bearer_token(&self) -> Option<String> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) => {
                debug!(path = %self.path.display(), "no persisted credential: {e}");
                return None;
            }
        };

        let persisted: PersistedToken = match serde_json::from_str(&data) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %self.path.display(), "unreadable credential file: {e}");
                return None;
            }
        };

        if persisted.token.is_empty() {
            return None;
        }

        if let Some(expires_at_ms) = persisted.expires_at_ms {
            let now_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;
            if expires_at_ms <= now_ms {
                debug!(path = %self.path.display(), "persisted credential expired");
                return None;
            }
        }

        Some(persisted.token)
    }

    async fn clear(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), "credential clear: {e}");
        }
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
