// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire frames for the clinic realtime protocol.
//!
//! Frames are JSON text with a SCREAMING_SNAKE_CASE `type` discriminator:
//! `{"type": "QUEUE_UPDATE", "data": {...}, "timestamp": "..."}`. Inbound
//! decoding happens in two steps (envelope first, then a typed payload per
//! kind) so an unknown kind and a malformed payload are reported
//! separately. Both are dropped; neither is fatal.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::RealtimeEvent;

/// Close code sent on deliberate disconnect; the only code that suppresses
/// reconnection.
pub const CLOSE_NORMAL: u16 = 1000;

/// Whether a close code means the session ended deliberately.
pub fn is_normal_close(code: u16) -> bool {
    code == CLOSE_NORMAL
}

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientFrame {
    Heartbeat { timestamp: String },
}

impl ClientFrame {
    /// Build a heartbeat frame stamped with the current time (RFC 3339).
    ///
    /// Used both for the periodic client heartbeat and as the reply to a
    /// server-initiated `HEARTBEAT`.
    pub fn heartbeat() -> Self {
        Self::Heartbeat { timestamp: Utc::now().to_rfc3339() }
    }
}

// ---------------------------------------------------------------------------
// Server -> Client payloads
// ---------------------------------------------------------------------------

/// Waiting-queue snapshot for the authenticated patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueUpdate {
    /// Position in the waiting queue (1 = next).
    #[serde(default)]
    pub position: Option<u32>,
    /// Patients currently waiting.
    #[serde(default)]
    pub total_waiting: Option<u32>,
    /// Server-estimated wait in minutes.
    #[serde(default)]
    pub estimated_wait_min: Option<u32>,
}

/// Patient status transition (e.g. `en_attente` to `en_consultation`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatutChange {
    #[serde(default)]
    pub patient_id: Option<String>,
    pub statut: String,
    /// Status before the transition, when the server includes it.
    #[serde(default)]
    pub precedent: Option<String>,
}

/// Free-form notification pushed by the clinic.
///
/// Covers both `NOTIFICATION` and `GENERAL_NOTIFICATION` wire kinds; they
/// land on the same local event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    #[serde(default)]
    pub title: Option<String>,
    pub message: String,
    #[serde(default)]
    pub level: Option<String>,
}

/// Appointment change for the authenticated patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RendezVousUpdate {
    #[serde(default)]
    pub rendez_vous_id: Option<String>,
    #[serde(default)]
    pub statut: Option<String>,
    /// Scheduled time as sent by the server (RFC 3339).
    #[serde(default)]
    pub horaire: Option<String>,
    #[serde(default)]
    pub praticien: Option<String>,
}

// ---------------------------------------------------------------------------
// Inbound decoding
// ---------------------------------------------------------------------------

/// Inbound envelope, before per-kind payload decoding.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Result of decoding one inbound text frame.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// A frame that maps to a subscriber-facing event.
    Event(RealtimeEvent),
    /// Server-initiated heartbeat; the client replies in kind.
    Heartbeat,
    /// Acknowledgement of a client heartbeat; logged only.
    HeartbeatAck,
    /// A kind outside the recognized set; logged and dropped.
    Unknown(String),
    /// Envelope or payload that failed to parse; logged and dropped.
    Malformed(String),
}

/// Decode one inbound frame and route it by kind.
///
/// This is the full routing table: every recognized wire kind maps either
/// to a typed [`RealtimeEvent`] or to an internal outcome. Anything else
/// is [`DecodeOutcome::Unknown`].
pub fn decode(text: &str) -> DecodeOutcome {
    let raw: RawFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => return DecodeOutcome::Malformed(format!("invalid frame: {e}")),
    };

    match raw.kind.as_str() {
        "HEARTBEAT" => DecodeOutcome::Heartbeat,
        "HEARTBEAT_RESPONSE" => DecodeOutcome::HeartbeatAck,
        "CONNECTION_CONFIRMED" => DecodeOutcome::Event(RealtimeEvent::ConnectionOpen),
        "QUEUE_UPDATE" => payload(&raw.kind, raw.data, RealtimeEvent::QueueUpdate),
        "STATUT_CHANGE" => payload(&raw.kind, raw.data, RealtimeEvent::StatutChange),
        "NOTIFICATION" | "GENERAL_NOTIFICATION" => {
            payload(&raw.kind, raw.data, RealtimeEvent::Notification)
        }
        "RENDEZ_VOUS_UPDATE" => payload(&raw.kind, raw.data, RealtimeEvent::RendezVousUpdate),
        _ => DecodeOutcome::Unknown(raw.kind),
    }
}

/// Decode a typed payload, or report the frame as malformed.
fn payload<T, F>(kind: &str, data: Value, wrap: F) -> DecodeOutcome
where
    T: DeserializeOwned,
    F: FnOnce(T) -> RealtimeEvent,
{
    match serde_json::from_value(data) {
        Ok(parsed) => DecodeOutcome::Event(wrap(parsed)),
        Err(e) => DecodeOutcome::Malformed(format!("{kind} payload: {e}")),
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
