// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Realtime client configuration.

use std::time::Duration;

/// Tuning for the realtime connection manager.
///
/// Owned by the composition root and handed to
/// [`ConnectionManager::new`](crate::manager::ConnectionManager::new).
/// There is no global configuration; each manager instance carries its own.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Realtime endpoint URL. Accepts `ws://`, `wss://`, `http://` or
    /// `https://`; http schemes are converted to their ws equivalent when
    /// the connection is opened.
    pub url: String,
    /// Interval between client-initiated heartbeat frames.
    pub heartbeat_interval: Duration,
    /// Fixed delay between reconnection attempts (no backoff).
    pub reconnect_delay: Duration,
    /// Reconnection attempts before the chain is abandoned.
    pub max_reconnect_attempts: u32,
    /// How long `test_connection` waits for the state to settle.
    pub probe_timeout: Duration,
    /// Poll interval inside `test_connection`.
    pub probe_poll: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8600/ws".to_owned(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            probe_timeout: Duration::from_secs(3),
            probe_poll: Duration::from_millis(100),
        }
    }
}

impl RealtimeConfig {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            anyhow::bail!("realtime URL must not be empty");
        }
        let known_scheme = ["ws://", "wss://", "http://", "https://"]
            .iter()
            .any(|scheme| self.url.starts_with(scheme));
        if !known_scheme {
            anyhow::bail!("unsupported realtime URL scheme: {}", self.url);
        }
        if self.max_reconnect_attempts == 0 {
            anyhow::bail!("max_reconnect_attempts must be at least 1");
        }
        Ok(())
    }

    /// Build a fast-timing config for tests. The heartbeat interval is
    /// long on purpose so tests can count heartbeats deterministically.
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            url: "ws://127.0.0.1:0/ws".to_owned(),
            heartbeat_interval: Duration::from_secs(60),
            reconnect_delay: Duration::from_millis(25),
            max_reconnect_attempts: 10,
            probe_timeout: Duration::from_secs(1),
            probe_poll: Duration::from_millis(10),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
