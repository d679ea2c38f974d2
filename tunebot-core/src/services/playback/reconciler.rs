// File: tunebot-core/src/services/playback/reconciler.rs
//
// Public face of the playback side: owns the session table and routes
// commands and engine events to the per-guild session actors.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tunebot_common::models::{
    ChannelId, EngineEvent, GuildId, LoopMode, QueueItem, SessionSnapshot,
};
use tunebot_common::traits::PlaybackEngine;
use tunebot_common::PlaybackError;

use crate::eventbus::{BotEvent, EventBus};
use crate::services::playback::actor::{
    EnqueueRequest, PlayOutcome, Reply, SessionActor, SessionHandle, SessionMessage,
};
use crate::services::playback::policy::PlaybackPolicy;
use crate::services::playback::resolver::QueryResolver;

/// A user asking for something to be played.
#[derive(Debug, Clone)]
pub struct PlayRequest {
    pub guild_id: GuildId,
    pub voice_channel_id: ChannelId,
    pub text_channel_id: Option<ChannelId>,
    pub query: String,
    pub requested_by: String,
}

pub struct SessionReconciler {
    engine: Arc<dyn PlaybackEngine>,
    resolver: QueryResolver,
    bus: EventBus,
    policy: PlaybackPolicy,
    sessions: Arc<DashMap<GuildId, SessionHandle>>,
}

impl SessionReconciler {
    pub fn new(engine: Arc<dyn PlaybackEngine>, bus: EventBus, policy: PlaybackPolicy) -> Arc<Self> {
        let resolver = QueryResolver::new(engine.clone(), policy.search_attempts, policy.search_retry_delay);
        Arc::new(Self {
            engine,
            resolver,
            bus,
            policy,
            sessions: Arc::new(DashMap::new()),
        })
    }

    /// Forwards engine events to the owning session. Events for guilds
    /// without a session are dropped.
    pub fn spawn_event_pump(&self, mut events: mpsc::UnboundedReceiver<EngineEvent>) -> JoinHandle<()> {
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let handle = sessions.get(&event.guild_id).map(|h| h.value().clone());
                match handle {
                    Some(handle) => {
                        if handle.tx.send(SessionMessage::Engine(event.kind)).is_err() {
                            debug!(guild_id = event.guild_id, "session closed before engine event arrived");
                        }
                    }
                    None => debug!(
                        guild_id = event.guild_id,
                        event = event.kind.name(),
                        "engine event for a guild without a session"
                    ),
                }
            }
            info!("engine event stream closed");
        })
    }

    /// Resolves the query, then enqueues the result in the guild's session,
    /// creating the session if there is none.
    pub async fn request_play(&self, request: PlayRequest) -> Result<PlayOutcome, PlaybackError> {
        let metadata = self.resolver.resolve(&request.query).await?;
        let item = QueueItem::from_metadata(metadata, &request.requested_by);
        let enqueue = EnqueueRequest {
            voice_channel_id: request.voice_channel_id,
            text_channel_id: request.text_channel_id,
            item,
        };

        // A session may terminate between lookup and delivery; the second
        // pass lands on a fresh one.
        for _ in 0..2 {
            let handle = self.session_handle(request.guild_id);
            let (reply_tx, reply_rx) = oneshot::channel();
            let msg = SessionMessage::Play {
                request: enqueue.clone(),
                reply: reply_tx,
            };
            if handle.tx.send(msg).is_err() {
                self.evict(request.guild_id, &handle);
                continue;
            }
            match reply_rx.await {
                Ok(result) => return result,
                Err(_) => self.evict(request.guild_id, &handle),
            }
        }
        warn!(guild_id = request.guild_id, "could not reach a live session for play request");
        Err(PlaybackError::SessionUnavailable)
    }

    /// Skips the current item; returns it.
    pub async fn request_skip(&self, guild_id: GuildId) -> Result<Option<QueueItem>, PlaybackError> {
        self.ask(guild_id, |reply| SessionMessage::Skip { reply }).await
    }

    /// Tears the session down. `Ok(false)` when there was nothing to stop.
    pub async fn request_stop(&self, guild_id: GuildId) -> Result<bool, PlaybackError> {
        match self.ask(guild_id, |reply| SessionMessage::Stop { reply }).await {
            Err(PlaybackError::NoSession) => Ok(false),
            other => other,
        }
    }

    pub async fn request_pause(&self, guild_id: GuildId) -> Result<(), PlaybackError> {
        self.ask(guild_id, |reply| SessionMessage::Pause { reply }).await
    }

    pub async fn request_resume(&self, guild_id: GuildId) -> Result<(), PlaybackError> {
        self.ask(guild_id, |reply| SessionMessage::Resume { reply }).await
    }

    pub async fn set_loop_mode(&self, guild_id: GuildId, mode: LoopMode) -> Result<LoopMode, PlaybackError> {
        self.ask(guild_id, |reply| SessionMessage::SetLoop { mode, reply }).await
    }

    /// `volume` is a percentage; anything above 100 is rejected.
    pub async fn set_volume(&self, guild_id: GuildId, volume: u32) -> Result<u8, PlaybackError> {
        let volume = u8::try_from(volume)
            .ok()
            .filter(|v| *v <= 100)
            .ok_or(PlaybackError::InvalidVolume(volume))?;
        self.ask(guild_id, |reply| SessionMessage::SetVolume { volume, reply }).await
    }

    pub fn get_snapshot(&self, guild_id: GuildId) -> Option<SessionSnapshot> {
        self.sessions.get(&guild_id).map(|h| h.snapshot.borrow().clone())
    }

    /// Snapshots of every live session, ordered by guild id.
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<SessionSnapshot> = self
            .sessions
            .iter()
            .map(|entry| entry.snapshot.borrow().clone())
            .collect();
        all.sort_by_key(|s| s.guild_id);
        all
    }

    /// Live view of one session's snapshot. The final value seen before the
    /// sender closes is the terminated snapshot.
    pub fn watch_session(&self, guild_id: GuildId) -> Option<watch::Receiver<SessionSnapshot>> {
        self.sessions.get(&guild_id).map(|h| h.snapshot.clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Stops every session. Used on process shutdown.
    pub async fn shutdown(&self) {
        let guilds: Vec<GuildId> = self.sessions.iter().map(|e| *e.key()).collect();
        info!(sessions = guilds.len(), "stopping all sessions");
        for guild_id in guilds {
            if let Err(e) = self.request_stop(guild_id).await {
                warn!(guild_id, error = %e, "failed to stop session during shutdown");
            }
        }
    }

    // ------------------------------------------------------------------

    async fn ask<T>(
        &self,
        guild_id: GuildId,
        build: impl FnOnce(Reply<T>) -> SessionMessage,
    ) -> Result<T, PlaybackError> {
        let handle = self
            .sessions
            .get(&guild_id)
            .map(|h| h.value().clone())
            .ok_or(PlaybackError::NoSession)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        if handle.tx.send(build(reply_tx)).is_err() {
            self.evict(guild_id, &handle);
            return Err(PlaybackError::NoSession);
        }
        // The actor dropping the reply means it terminated first.
        reply_rx.await.unwrap_or(Err(PlaybackError::NoSession))
    }

    fn session_handle(&self, guild_id: GuildId) -> SessionHandle {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| self.spawn_session(guild_id))
            .value()
            .clone()
    }

    fn evict(&self, guild_id: GuildId, stale: &SessionHandle) {
        let generation = stale.generation;
        if self
            .sessions
            .remove_if(&guild_id, |_, h| h.generation == generation)
            .is_some()
        {
            debug!(guild_id, %generation, "evicted closed session handle");
        }
    }

    fn spawn_session(&self, guild_id: GuildId) -> SessionHandle {
        let (actor, handle) = SessionActor::new(
            guild_id,
            self.engine.clone(),
            self.bus.clone(),
            self.policy.clone(),
            self.sessions.clone(),
        );
        info!(guild_id, generation = %handle.generation, "creating playback session");

        let task = tokio::spawn(actor.run());

        // An actor that dies abnormally must not leave a dead entry or a
        // dangling voice connection behind.
        let sessions = self.sessions.clone();
        let engine = self.engine.clone();
        let bus = self.bus.clone();
        let generation = handle.generation;
        tokio::spawn(async move {
            let Err(join_err) = task.await else {
                return;
            };
            error!(guild_id, error = %join_err, "session actor crashed");
            sessions.remove_if(&guild_id, |_, h| h.generation == generation);
            if let Err(e) = engine.disconnect(guild_id).await {
                warn!(guild_id, error = %e, "disconnect after crash failed");
            }
            bus.publish(BotEvent::SessionEnded {
                guild_id,
                reason: "internal error".into(),
                timestamp: chrono::Utc::now(),
            })
            .await;
        });

        handle
    }
}
