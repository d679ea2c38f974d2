// File: tunebot-core/src/services/playback/session.rs
//
// The per-guild session record. Only the owning session actor touches it;
// everything else sees `SessionSnapshot`s.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use tunebot_common::models::{
    ChannelId, GuildId, LoopMode, PlayToken, QueueItem, SessionSnapshot, SessionState,
};

#[derive(Debug)]
pub struct Session {
    pub guild_id: GuildId,
    pub state: SessionState,
    pub current_item: Option<Arc<QueueItem>>,
    pub pending_queue: VecDeque<Arc<QueueItem>>,
    pub loop_mode: LoopMode,
    pub retry_count: u32,
    pub last_activity_at: DateTime<Utc>,
    pub voice_channel_id: Option<ChannelId>,
    pub text_channel_id: Option<ChannelId>,
    pub volume: u8,
    pub connected: bool,
    /// Token of the play attempt the session is waiting on or listening to.
    pub current_token: Option<PlayToken>,
    /// Set when the engine confirmed audible playback of `current_item`.
    pub audible_since: Option<Instant>,
    paused_at: Option<Instant>,
    next_token: u64,
}

impl Session {
    pub fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            state: SessionState::Idle,
            current_item: None,
            pending_queue: VecDeque::new(),
            loop_mode: LoopMode::Off,
            retry_count: 0,
            last_activity_at: Utc::now(),
            voice_channel_id: None,
            text_channel_id: None,
            volume: 100,
            connected: false,
            current_token: None,
            audible_since: None,
            paused_at: None,
            next_token: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Hands out the token for a new play attempt and makes it current, so
    /// anything still in flight for the previous attempt becomes stale.
    pub fn issue_token(&mut self) -> PlayToken {
        self.next_token += 1;
        let token = PlayToken(self.next_token);
        self.current_token = Some(token);
        self.audible_since = None;
        self.paused_at = None;
        token
    }

    pub fn is_current(&self, token: PlayToken) -> bool {
        self.current_token == Some(token)
    }

    /// Appends to the pending queue; returns the 1-based queue position.
    pub fn enqueue(&mut self, item: Arc<QueueItem>) -> usize {
        self.pending_queue.push_back(item);
        self.pending_queue.len()
    }

    /// Applies the loop mode to an item that just finished. Must run once
    /// per finished item, before the queue is checked for emptiness.
    pub fn apply_loop_policy(&mut self, finished: Arc<QueueItem>) {
        match self.loop_mode {
            LoopMode::RepeatItem => self.pending_queue.push_front(finished),
            LoopMode::RepeatQueue => self.pending_queue.push_back(finished),
            LoopMode::Off => {}
        }
    }

    /// Takes the current item out of the session, clearing playback markers.
    pub fn take_current(&mut self) -> Option<Arc<QueueItem>> {
        self.current_token = None;
        self.audible_since = None;
        self.paused_at = None;
        self.current_item.take()
    }

    /// Moves the head of the queue into `current_item`.
    pub fn promote_next(&mut self) -> Option<Arc<QueueItem>> {
        let next = self.pending_queue.pop_front()?;
        self.current_item = Some(next.clone());
        self.retry_count = 0;
        Some(next)
    }

    pub fn clear(&mut self) {
        self.pending_queue.clear();
        self.take_current();
    }

    /// Stops the audible clock until `resume_clock`.
    pub fn pause_clock(&mut self) {
        if self.paused_at.is_none() {
            self.paused_at = Some(Instant::now());
        }
    }

    /// Shifts `audible_since` forward by the time spent paused.
    pub fn resume_clock(&mut self) {
        if let (Some(paused_at), Some(since)) = (self.paused_at.take(), self.audible_since) {
            self.audible_since = Some(since + paused_at.elapsed());
        }
    }

    /// How long the current item has been audible, if it ever was. Time
    /// spent paused does not count.
    pub fn audible_for(&self) -> Option<Duration> {
        let since = self.audible_since?;
        let until = self.paused_at.unwrap_or_else(Instant::now);
        Some(until.saturating_duration_since(since))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            guild_id: self.guild_id,
            state: self.state,
            current_item: self.current_item.as_deref().cloned(),
            queue: self.pending_queue.iter().map(|i| (**i).clone()).collect(),
            loop_mode: self.loop_mode,
            volume: self.volume,
            retry_count: self.retry_count,
            voice_channel_id: self.voice_channel_id,
            text_channel_id: self.text_channel_id,
            connected: self.connected,
            last_activity_at: self.last_activity_at,
        }
    }
}
