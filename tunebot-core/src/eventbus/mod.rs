//! src/eventbus/mod.rs
//!
//! Provides an in-process event bus that fans events out to multiple
//! subscribers via bounded MPSC queues. Publishing never waits on a
//! subscriber.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::warn;

use tunebot_common::models::{ChannelId, GuildId, SessionSnapshot};

/// Events the playback side of the bot publishes for anyone listening
/// (the Discord notification relay, the dashboard event stream).
#[derive(Debug, Clone)]
pub enum BotEvent {
    /// A session changed state, queue, loop mode or volume.
    SessionUpdated(SessionSnapshot),

    /// A session was torn down and removed from the session table.
    SessionEnded {
        guild_id: GuildId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Human-readable text meant for the guild's text channel.
    Notification {
        guild_id: GuildId,
        text_channel_id: Option<ChannelId>,
        message: String,
    },
}

impl BotEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            BotEvent::SessionUpdated(_) => "session",
            BotEvent::SessionEnded { .. } => "ended",
            BotEvent::Notification { .. } => "notification",
        }
    }

    pub fn guild_id(&self) -> GuildId {
        match self {
            BotEvent::SessionUpdated(snap) => snap.guild_id,
            BotEvent::SessionEnded { guild_id, .. } => *guild_id,
            BotEvent::Notification { guild_id, .. } => *guild_id,
        }
    }
}

/// Each subscriber gets its own `mpsc::Sender<BotEvent>`.
///
/// - Session actors publish, so `publish` never waits: a subscriber whose
///   buffer is full is evicted, and its receiver sees the channel close
///   once it has drained what was already buffered.
/// - If the subscriber has dropped the `Receiver`, its sender is pruned on
///   the next publish.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<BotEvent>>>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Default size for each subscriber’s buffer.
const DEFAULT_BUFFER_SIZE: usize = 1024;

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            subscribers: Arc::new(Mutex::new(vec![])),
            shutdown_tx: Arc::new(tx),
            shutdown_rx: rx,
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Resolves once `shutdown` has been called.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_rx.clone();
        let _ = rx.wait_for(|down| *down).await;
    }

    /// Returns a receiver on which events will be delivered.
    pub async fn subscribe(&self, buffer_size: Option<usize>) -> mpsc::Receiver<BotEvent> {
        let size = buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let (tx, rx) = mpsc::channel(size);
        let mut subs = self.subscribers.lock().await;
        subs.push(tx);
        rx
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Publish an event to all subscribers.
    pub async fn publish(&self, event: BotEvent) {
        let mut subs = self.subscribers.lock().await;
        subs.retain(|s| match s.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    guild_id = event.guild_id(),
                    event = event.event_type(),
                    capacity = s.max_capacity(),
                    "event subscriber is not keeping up; dropping it"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    /// Convenience method: publish a `Notification` event.
    pub async fn notify(&self, guild_id: GuildId, text_channel_id: Option<ChannelId>, message: impl Into<String>) {
        self.publish(BotEvent::Notification {
            guild_id,
            text_channel_id,
            message: message.into(),
        })
        .await;
    }
}
