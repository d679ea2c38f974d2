// File: tunebot-common/src/models/engine.rs
//
// Events emitted by a playback engine. The engine pushes them into the
// reconciler's event channel; everything here is plain data.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::GuildId;

/// Identifies one `play` attempt within a session. Engines echo the token on
/// every item-level event so late events from superseded attempts can be
/// told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayToken(pub u64);

impl fmt::Display for PlayToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineErrorClass {
    /// The stream broke; the connection is believed healthy.
    Transient,
    /// The voice connection itself failed (aborted, dropped, refused).
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEventKind {
    ConnectionCreated,
    ConnectionDestroyed,
    ItemStarted {
        token: PlayToken,
        resource_present: bool,
    },
    ItemFinished {
        token: PlayToken,
    },
    QueueEmpty,
    Error {
        token: Option<PlayToken>,
        class: EngineErrorClass,
        message: String,
    },
}

impl EngineEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEventKind::ConnectionCreated => "connection-created",
            EngineEventKind::ConnectionDestroyed => "connection-destroyed",
            EngineEventKind::ItemStarted { .. } => "item-started",
            EngineEventKind::ItemFinished { .. } => "item-finished",
            EngineEventKind::QueueEmpty => "queue-empty",
            EngineEventKind::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEvent {
    pub guild_id: GuildId,
    pub kind: EngineEventKind,
}

impl EngineEvent {
    pub fn new(guild_id: GuildId, kind: EngineEventKind) -> Self {
        Self { guild_id, kind }
    }
}
