// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscriber-facing event model.
//!
//! [`RealtimeEvent`] is the closed union of everything the connection
//! manager can deliver. [`EventKind`] is its fieldless discriminant, used
//! as the subscription key so matching over subscriptions stays exhaustive
//! at compile time.

use serde::Serialize;
use std::fmt;

use crate::error::ConnectionFailure;
use crate::protocol::{Notice, QueueUpdate, RendezVousUpdate, StatutChange};

/// Subscription key: one variant per subscriber-facing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    QueueUpdate,
    StatutChange,
    Notification,
    RendezVousUpdate,
    ConnectionOpen,
    ConnectionClose,
    ConnectionError,
}

impl EventKind {
    /// Every subscribable kind, in a stable order.
    pub const ALL: [EventKind; 7] = [
        EventKind::QueueUpdate,
        EventKind::StatutChange,
        EventKind::Notification,
        EventKind::RendezVousUpdate,
        EventKind::ConnectionOpen,
        EventKind::ConnectionClose,
        EventKind::ConnectionError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueUpdate => "queue_update",
            Self::StatutChange => "statut_change",
            Self::Notification => "notification",
            Self::RendezVousUpdate => "rendez_vous_update",
            Self::ConnectionOpen => "connection_open",
            Self::ConnectionClose => "connection_close",
            Self::ConnectionError => "connection_error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the transport closed.
#[derive(Debug, Clone, Serialize)]
pub struct CloseInfo {
    /// WebSocket close code (1000 = deliberate).
    pub code: u16,
    pub reason: String,
}

/// One event delivered to subscribers.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    QueueUpdate(QueueUpdate),
    StatutChange(StatutChange),
    Notification(Notice),
    RendezVousUpdate(RendezVousUpdate),
    /// The connection opened, or the server re-confirmed it.
    ConnectionOpen,
    ConnectionClose(CloseInfo),
    ConnectionError(ConnectionFailure),
}

impl RealtimeEvent {
    /// The subscription list this event is delivered to.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::QueueUpdate(_) => EventKind::QueueUpdate,
            Self::StatutChange(_) => EventKind::StatutChange,
            Self::Notification(_) => EventKind::Notification,
            Self::RendezVousUpdate(_) => EventKind::RendezVousUpdate,
            Self::ConnectionOpen => EventKind::ConnectionOpen,
            Self::ConnectionClose(_) => EventKind::ConnectionClose,
            Self::ConnectionError(_) => EventKind::ConnectionError,
        }
    }
}
