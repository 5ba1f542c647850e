// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure classes carried by `connection_error` events and log fields.
///
/// None of these cross the public API as errors: ordinary network trouble
/// is reported through state and events only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Bearer token absent or unreadable; the attempt is aborted.
    Credential,
    /// Socket-level failure, at connect time or mid-stream.
    Transport,
    /// Close with a code other than 1000.
    AbnormalClose,
    /// Inbound frame that could not be decoded.
    Decode,
    /// A subscriber callback panicked during dispatch.
    Subscriber,
    /// The reconnection chain ran out of attempts.
    RetriesExhausted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credential => "credential",
            Self::Transport => "transport",
            Self::AbnormalClose => "abnormal_close",
            Self::Decode => "decode",
            Self::Subscriber => "subscriber",
            Self::RetriesExhausted => "retries_exhausted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure, dispatched with the `connection_error` event.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ConnectionFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
