// File: tunebot-common/src/models/session.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ChannelId, GuildId, QueueItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Playing,
    Paused,
    Draining,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Playing => "playing",
            SessionState::Paused => "paused",
            SessionState::Draining => "draining",
            SessionState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    #[default]
    Off,
    RepeatItem,
    RepeatQueue,
}

impl LoopMode {
    /// Off -> RepeatItem -> RepeatQueue -> Off, the order the loop button cycles through.
    pub fn next(self) -> Self {
        match self {
            LoopMode::Off => LoopMode::RepeatItem,
            LoopMode::RepeatItem => LoopMode::RepeatQueue,
            LoopMode::RepeatQueue => LoopMode::Off,
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopMode::Off => write!(f, "off"),
            LoopMode::RepeatItem => write!(f, "track"),
            LoopMode::RepeatQueue => write!(f, "queue"),
        }
    }
}

impl FromStr for LoopMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" | "none" => Ok(LoopMode::Off),
            "track" | "item" | "song" | "repeat_item" => Ok(LoopMode::RepeatItem),
            "queue" | "all" | "repeat_queue" => Ok(LoopMode::RepeatQueue),
            other => Err(format!("Unknown loop mode: {other}")),
        }
    }
}

/// Read model of one guild's session, handed to the command layer and the
/// dashboard. Never mutated by its readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub guild_id: GuildId,
    pub state: SessionState,
    pub current_item: Option<QueueItem>,
    pub queue: Vec<QueueItem>,
    pub loop_mode: LoopMode,
    pub volume: u8,
    pub retry_count: u32,
    pub voice_channel_id: Option<ChannelId>,
    pub text_channel_id: Option<ChannelId>,
    pub connected: bool,
    pub last_activity_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn idle(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            state: SessionState::Idle,
            current_item: None,
            queue: Vec::new(),
            loop_mode: LoopMode::Off,
            volume: 100,
            retry_count: 0,
            voice_channel_id: None,
            text_channel_id: None,
            connected: false,
            last_activity_at: Utc::now(),
        }
    }

    pub fn is_audible(&self) -> bool {
        matches!(self.state, SessionState::Playing | SessionState::Paused) && self.current_item.is_some()
    }
}
