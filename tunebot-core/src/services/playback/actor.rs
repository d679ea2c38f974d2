// File: tunebot-core/src/services/playback/actor.rs
//
// One task per guild. Every command and every engine event for the guild
// goes through this actor's mailbox, so transitions never interleave.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tunebot_common::models::{
    ChannelId, EngineErrorClass, EngineEventKind, GuildId, LoopMode, PlayToken, QueueItem,
    SessionSnapshot, SessionState,
};
use tunebot_common::traits::PlaybackEngine;
use tunebot_common::PlaybackError;

use crate::eventbus::{BotEvent, EventBus};
use crate::services::playback::policy::PlaybackPolicy;
use crate::services::playback::session::Session;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, PlaybackError>>;

/// An item resolved by the reconciler, ready to be queued.
#[derive(Debug, Clone)]
pub(crate) struct EnqueueRequest {
    pub voice_channel_id: ChannelId,
    pub text_channel_id: Option<ChannelId>,
    pub item: QueueItem,
}

/// What happened to a play request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The item is being started right away.
    Starting { item: QueueItem },
    /// The item was appended behind others; `position` is 1-based.
    Queued { item: QueueItem, position: usize },
}

impl PlayOutcome {
    pub fn item(&self) -> &QueueItem {
        match self {
            PlayOutcome::Starting { item } | PlayOutcome::Queued { item, .. } => item,
        }
    }
}

pub(crate) enum SessionMessage {
    Play { request: EnqueueRequest, reply: Reply<PlayOutcome> },
    Skip { reply: Reply<Option<QueueItem>> },
    Stop { reply: Reply<bool> },
    Pause { reply: Reply<()> },
    Resume { reply: Reply<()> },
    SetLoop { mode: LoopMode, reply: Reply<LoopMode> },
    SetVolume { volume: u8, reply: Reply<u8> },
    Engine(EngineEventKind),
}

#[derive(Clone)]
pub(crate) struct SessionHandle {
    pub generation: Uuid,
    pub tx: mpsc::UnboundedSender<SessionMessage>,
    pub snapshot: watch::Receiver<SessionSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    /// The engine has this long to report the attempt as started.
    ResourceWait(PlayToken),
    /// Re-issue the current item after a session-level failure.
    RetryBackoff,
    /// Move past an item that failed mid-stream.
    SkipAfterError,
    IdleDrain,
}

#[derive(Debug, Clone, Copy)]
struct ScheduledTask {
    deadline: Instant,
    kind: TimerKind,
}

#[derive(Debug, Clone)]
enum FailureCause {
    ConnectFailed(String),
    PlayRejected(String),
    ResourceMissing,
    ResourceTimeout,
    QuickFinish { audible: Duration },
    ConnectionLost,
    Engine { class: EngineErrorClass, message: String },
}

impl FailureCause {
    /// Whether the voice connection must be re-established before retrying.
    fn drops_connection(&self) -> bool {
        matches!(
            self,
            FailureCause::ConnectFailed(_)
                | FailureCause::ConnectionLost
                | FailureCause::Engine { class: EngineErrorClass::Fatal, .. }
        )
    }

    fn classify(&self, title: &str) -> PlaybackError {
        match self {
            FailureCause::ConnectFailed(msg) => PlaybackError::ConnectionError(msg.clone()),
            FailureCause::ConnectionLost => PlaybackError::ConnectionError("voice connection lost".into()),
            FailureCause::Engine { class: EngineErrorClass::Fatal, message } => {
                PlaybackError::ConnectionError(message.clone())
            }
            _ => PlaybackError::ResourceCreationTimeout(title.to_string()),
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::ConnectFailed(msg) => write!(f, "connect failed: {msg}"),
            FailureCause::PlayRejected(msg) => write!(f, "play rejected: {msg}"),
            FailureCause::ResourceMissing => write!(f, "started without an audio resource"),
            FailureCause::ResourceTimeout => write!(f, "no audio resource within the wait window"),
            FailureCause::QuickFinish { audible } => {
                write!(f, "finished after only {:.1}s of audio", audible.as_secs_f32())
            }
            FailureCause::ConnectionLost => write!(f, "voice connection destroyed"),
            FailureCause::Engine { class, message } => write!(f, "{class:?} engine error: {message}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum EndReason {
    Stopped,
    Idle,
    Unrecoverable,
    ConnectionClosed,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndReason::Stopped => "stopped",
            EndReason::Idle => "idle timeout",
            EndReason::Unrecoverable => "unrecoverable failure",
            EndReason::ConnectionClosed => "voice connection closed",
        };
        f.write_str(s)
    }
}

enum Step {
    Message(SessionMessage),
    Timer,
}

pub(crate) struct SessionActor {
    session: Session,
    generation: Uuid,
    engine: Arc<dyn PlaybackEngine>,
    bus: EventBus,
    policy: PlaybackPolicy,
    timer: Option<ScheduledTask>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    registry: Arc<DashMap<GuildId, SessionHandle>>,
    rx: mpsc::UnboundedReceiver<SessionMessage>,
}

impl SessionActor {
    /// Builds the actor and the handle the session table keeps for it.
    pub(crate) fn new(
        guild_id: GuildId,
        engine: Arc<dyn PlaybackEngine>,
        bus: EventBus,
        policy: PlaybackPolicy,
        registry: Arc<DashMap<GuildId, SessionHandle>>,
    ) -> (Self, SessionHandle) {
        let session = Session::new(guild_id);
        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
        let generation = Uuid::new_v4();
        let handle = SessionHandle {
            generation,
            tx,
            snapshot: snapshot_rx,
        };
        let actor = Self {
            session,
            generation,
            engine,
            bus,
            policy,
            timer: None,
            snapshot_tx,
            registry,
            rx,
        };
        (actor, handle)
    }

    fn guild_id(&self) -> GuildId {
        self.session.guild_id
    }

    pub(crate) async fn run(mut self) {
        debug!(guild_id = self.guild_id(), generation = %self.generation, "session actor started");

        loop {
            let deadline = self.timer.map(|t| t.deadline);
            let step = tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(msg) => Step::Message(msg),
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => Step::Timer,
            };

            match step {
                Step::Message(msg) => self.handle_message(msg).await,
                Step::Timer => {
                    if let Some(task) = self.timer.take() {
                        self.on_timer(task.kind).await;
                    }
                }
            }

            if self.session.state == SessionState::Terminated {
                break;
            }
            self.publish_snapshot().await;
        }

        debug!(guild_id = self.guild_id(), generation = %self.generation, "session actor stopped");
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    async fn handle_message(&mut self, msg: SessionMessage) {
        match msg {
            SessionMessage::Play { request, reply } => {
                let result = self.on_play(request).await;
                self.respond(reply, result).await;
            }
            SessionMessage::Skip { reply } => {
                let result = self.on_skip().await;
                self.respond(reply, result).await;
            }
            SessionMessage::Stop { reply } => {
                self.terminate(EndReason::Stopped).await;
                let _ = reply.send(Ok(true));
            }
            SessionMessage::Pause { reply } => {
                let result = self.on_pause().await;
                self.respond(reply, result).await;
            }
            SessionMessage::Resume { reply } => {
                let result = self.on_resume().await;
                self.respond(reply, result).await;
            }
            SessionMessage::SetLoop { mode, reply } => {
                self.session.touch();
                self.session.loop_mode = mode;
                info!(guild_id = self.guild_id(), loop_mode = %mode, "loop mode changed");
                self.respond(reply, Ok(mode)).await;
            }
            SessionMessage::SetVolume { volume, reply } => {
                let result = self.on_set_volume(volume).await;
                self.respond(reply, result).await;
            }
            SessionMessage::Engine(kind) => self.on_engine_event(kind).await,
        }
    }

    /// Publishes the snapshot before replying, so a caller that reads the
    /// snapshot after its reply sees the effect of its own command.
    async fn respond<T>(&mut self, reply: Reply<T>, result: Result<T, PlaybackError>) {
        if self.session.state != SessionState::Terminated {
            self.publish_snapshot().await;
        }
        let _ = reply.send(result);
    }

    async fn on_engine_event(&mut self, kind: EngineEventKind) {
        debug!(
            guild_id = self.guild_id(),
            event = kind.name(),
            state = %self.session.state,
            "engine event"
        );
        match kind {
            EngineEventKind::ConnectionCreated => {
                self.session.connected = true;
                self.session.touch();
            }
            EngineEventKind::ConnectionDestroyed => self.on_connection_destroyed().await,
            EngineEventKind::ItemStarted { token, resource_present } => {
                self.on_item_started(token, resource_present).await
            }
            EngineEventKind::ItemFinished { token } => self.on_item_finished(token).await,
            EngineEventKind::QueueEmpty => {
                debug!(guild_id = self.guild_id(), "engine reported an empty queue; queue is owned here, ignoring");
            }
            EngineEventKind::Error { token, class, message } => self.on_engine_error(token, class, message).await,
        }
    }

    async fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::ResourceWait(token) => {
                if self.session.is_current(token) && self.session.audible_since.is_none() {
                    self.session_failure(FailureCause::ResourceTimeout).await;
                }
            }
            TimerKind::RetryBackoff => {
                if self.session.current_item.is_some() {
                    info!(
                        guild_id = self.guild_id(),
                        attempt = self.session.retry_count + 1,
                        max_attempts = self.policy.max_attempts,
                        "retrying current item"
                    );
                    self.start_current().await;
                }
            }
            TimerKind::SkipAfterError => self.advance().await,
            TimerKind::IdleDrain => {
                if self.session.state == SessionState::Draining && self.session.pending_queue.is_empty() {
                    info!(guild_id = self.guild_id(), "idle timeout elapsed with an empty queue");
                    self.terminate(EndReason::Idle).await;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    async fn on_play(&mut self, request: EnqueueRequest) -> Result<PlayOutcome, PlaybackError> {
        self.session.touch();
        if self.session.text_channel_id.is_none() {
            self.session.text_channel_id = request.text_channel_id;
        }
        let item = Arc::new(request.item);
        let outcome_item = (*item).clone();

        match self.session.state {
            SessionState::Idle => {
                self.session.voice_channel_id = Some(request.voice_channel_id);
                self.session.enqueue(item);
                self.session.promote_next();
                self.session.state = SessionState::Connecting;
                info!(
                    guild_id = self.guild_id(),
                    voice_channel_id = request.voice_channel_id,
                    item = %outcome_item.title,
                    "joining voice channel"
                );
                self.start_current().await;
                Ok(PlayOutcome::Starting { item: outcome_item })
            }
            SessionState::Draining => {
                self.cancel_timer();
                self.session.enqueue(item);
                info!(guild_id = self.guild_id(), item = %outcome_item.title, "item enqueued while draining; resuming");
                self.advance().await;
                Ok(PlayOutcome::Starting { item: outcome_item })
            }
            SessionState::Connecting | SessionState::Playing | SessionState::Paused => {
                let position = self.session.enqueue(item);
                info!(guild_id = self.guild_id(), item = %outcome_item.title, position, "item enqueued");
                Ok(PlayOutcome::Queued { item: outcome_item, position })
            }
            SessionState::Terminated => Err(PlaybackError::SessionUnavailable),
        }
    }

    async fn on_skip(&mut self) -> Result<Option<QueueItem>, PlaybackError> {
        let skippable = matches!(
            self.session.state,
            SessionState::Connecting | SessionState::Playing | SessionState::Paused
        );
        if !skippable || self.session.current_item.is_none() {
            return Err(PlaybackError::NoSession);
        }

        self.session.touch();
        self.cancel_timer();
        if let Err(e) = self.engine.stop_current(self.guild_id()).await {
            warn!(guild_id = self.guild_id(), error = %e, "engine refused to stop the skipped item");
        }
        let skipped = self.session.take_current();
        if let Some(item) = &skipped {
            info!(guild_id = self.guild_id(), item = %item.title, "skipping item");
            if self.session.loop_mode == LoopMode::RepeatQueue {
                self.session.pending_queue.push_back(item.clone());
            }
        }
        self.session.retry_count = 0;
        self.advance().await;
        Ok(skipped.map(|i| (*i).clone()))
    }

    async fn on_pause(&mut self) -> Result<(), PlaybackError> {
        if self.session.state != SessionState::Playing || self.session.audible_since.is_none() {
            return Err(PlaybackError::InvalidState {
                action: "pause",
                state: self.session.state.to_string(),
            });
        }
        self.engine.pause(self.guild_id()).await?;
        self.session.pause_clock();
        self.session.state = SessionState::Paused;
        self.session.touch();
        info!(guild_id = self.guild_id(), "playback paused");
        Ok(())
    }

    async fn on_resume(&mut self) -> Result<(), PlaybackError> {
        if self.session.state != SessionState::Paused {
            return Err(PlaybackError::InvalidState {
                action: "resume",
                state: self.session.state.to_string(),
            });
        }
        self.engine.resume(self.guild_id()).await?;
        self.session.resume_clock();
        self.session.state = SessionState::Playing;
        self.session.touch();
        info!(guild_id = self.guild_id(), "playback resumed");
        Ok(())
    }

    async fn on_set_volume(&mut self, volume: u8) -> Result<u8, PlaybackError> {
        if self.session.connected {
            self.engine.set_volume(self.guild_id(), volume).await?;
        }
        self.session.volume = volume;
        self.session.touch();
        info!(guild_id = self.guild_id(), volume, "volume changed");
        Ok(volume)
    }

    // ------------------------------------------------------------------
    // Engine events
    // ------------------------------------------------------------------

    async fn on_item_started(&mut self, token: PlayToken, resource_present: bool) {
        if !self.session.is_current(token) {
            debug!(guild_id = self.guild_id(), %token, "ignoring stale item-started");
            return;
        }
        if self.session.audible_since.is_some() {
            return;
        }
        if !resource_present {
            self.session_failure(FailureCause::ResourceMissing).await;
            return;
        }

        self.cancel_timer();
        self.session.state = SessionState::Playing;
        self.session.audible_since = Some(Instant::now());
        self.session.touch();

        if let Some(item) = self.session.current_item.clone() {
            info!(guild_id = self.guild_id(), item = %item.title, %token, "item audible");
            self.notify(format!(
                "Now playing: **{}** by {} ({})",
                item.title,
                item.author,
                item.duration_label()
            ))
            .await;
        }
    }

    async fn on_item_finished(&mut self, token: PlayToken) {
        if !self.session.is_current(token) {
            debug!(guild_id = self.guild_id(), %token, "ignoring stale item-finished");
            return;
        }
        let Some(item) = self.session.current_item.clone() else {
            return;
        };

        match self.session.audible_for() {
            None => {
                self.session_failure(FailureCause::ResourceMissing).await;
                return;
            }
            Some(audible) if self.is_quick_finish(&item, audible) => {
                self.session_failure(FailureCause::QuickFinish { audible }).await;
                return;
            }
            Some(_) => {}
        }

        self.cancel_timer();
        self.session.touch();
        debug!(guild_id = self.guild_id(), item = %item.title, loop_mode = %self.session.loop_mode, "item finished");
        if let Some(finished) = self.session.take_current() {
            self.session.apply_loop_policy(finished);
        }
        self.advance().await;
    }

    async fn on_engine_error(&mut self, token: Option<PlayToken>, class: EngineErrorClass, message: String) {
        if let Some(token) = token {
            if !self.session.is_current(token) {
                debug!(guild_id = self.guild_id(), %token, "ignoring stale engine error");
                return;
            }
        }
        let Some(item) = self.session.current_item.clone() else {
            warn!(
                guild_id = self.guild_id(),
                state = %self.session.state,
                connected = self.session.connected,
                ?class,
                error = %message,
                "engine error with no current item"
            );
            return;
        };

        let audible = self.session.audible_for();
        warn!(
            guild_id = self.guild_id(),
            item = %item.title,
            retry_count = self.session.retry_count,
            state = %self.session.state,
            connected = self.session.connected,
            audible_secs = audible.map(|d| d.as_secs_f32()),
            ?class,
            error = %message,
            "engine reported an error"
        );

        match (class, audible) {
            (EngineErrorClass::Transient, Some(audible)) if audible >= self.policy.min_audible => {
                self.item_failure(item).await
            }
            _ => self.session_failure(FailureCause::Engine { class, message }).await,
        }
    }

    async fn on_connection_destroyed(&mut self) {
        self.session.connected = false;
        self.session.touch();
        match self.session.state {
            SessionState::Playing | SessionState::Paused if self.session.current_item.is_some() => {
                self.session_failure(FailureCause::ConnectionLost).await;
            }
            SessionState::Draining => self.terminate(EndReason::ConnectionClosed).await,
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    fn is_quick_finish(&self, item: &QueueItem, audible: Duration) -> bool {
        let long_item = item
            .duration_seconds
            .is_some_and(|secs| Duration::from_secs(secs) > self.policy.min_audible);
        long_item && audible < self.policy.min_audible
    }

    /// Issues a play request for `current_item`, joining the voice channel
    /// first when there is no live connection.
    async fn start_current(&mut self) {
        let Some(item) = self.session.current_item.clone() else {
            return;
        };
        let guild_id = self.guild_id();

        if !self.session.connected {
            self.session.state = SessionState::Connecting;
            let Some(channel_id) = self.session.voice_channel_id else {
                error!(guild_id, "no voice channel recorded for the session");
                self.terminate(EndReason::Unrecoverable).await;
                return;
            };
            if let Err(e) = self.engine.connect(guild_id, channel_id).await {
                self.session_failure(FailureCause::ConnectFailed(e.to_string())).await;
                return;
            }
            self.session.connected = true;
            if self.session.volume != 100 {
                if let Err(e) = self.engine.set_volume(guild_id, self.session.volume).await {
                    warn!(guild_id, error = %e, "could not restore volume after connecting");
                }
            }
        }

        let token = self.session.issue_token();
        debug!(guild_id, item = %item.title, %token, attempt = self.session.retry_count + 1, "issuing play");
        match self.engine.play(guild_id, &item, token).await {
            Ok(()) => self.arm_timer(TimerKind::ResourceWait(token), self.policy.resource_timeout),
            Err(e) => self.session_failure(FailureCause::PlayRejected(e.to_string())).await,
        }
    }

    /// Drops the current item (if any) and starts the next one, or starts
    /// draining when nothing is left.
    async fn advance(&mut self) {
        self.session.take_current();
        match self.session.promote_next() {
            Some(_) => {
                self.session.state = SessionState::Playing;
                self.start_current().await;
            }
            None => self.enter_draining().await,
        }
    }

    async fn enter_draining(&mut self) {
        self.session.state = SessionState::Draining;
        self.arm_timer(TimerKind::IdleDrain, self.policy.idle_timeout);
        info!(guild_id = self.guild_id(), idle_secs = self.policy.idle_timeout.as_secs(), "queue exhausted; draining");
        self.notify(format!(
            "Queue finished. Leaving the voice channel in {} seconds unless something is added.",
            self.policy.idle_timeout.as_secs()
        ))
        .await;
    }

    /// The item broke after playing for a while: report it and move on
    /// without retrying it.
    async fn item_failure(&mut self, item: Arc<QueueItem>) {
        let err = PlaybackError::TransientPlaybackError(item.title.clone());
        info!(guild_id = self.guild_id(), item = %item.title, "item-level failure; skipping");
        // Late events for this attempt must not advance the queue a second time.
        self.session.current_token = None;
        if let Err(e) = self.engine.stop_current(self.guild_id()).await {
            debug!(guild_id = self.guild_id(), error = %e, "stop after item failure failed");
        }
        self.notify(err.to_string()).await;
        self.arm_timer(TimerKind::SkipAfterError, self.policy.skip_delay);
    }

    /// Playback never became (or stopped being) audible for reasons blamed
    /// on the connection: retry the same item up to the attempt bound.
    async fn session_failure(&mut self, cause: FailureCause) {
        let Some(item) = self.session.current_item.clone() else {
            return;
        };
        let guild_id = self.guild_id();
        self.session.retry_count += 1;
        let attempts = self.session.retry_count;
        let classified = cause.classify(&item.title);

        warn!(
            guild_id,
            item = %item.title,
            item_id = %item.id,
            retry_count = attempts,
            max_attempts = self.policy.max_attempts,
            state = %self.session.state,
            connected = self.session.connected,
            %cause,
            error = %classified,
            "session-level playback failure"
        );

        self.session.current_token = None;
        self.session.audible_since = None;
        self.cancel_timer();
        if cause.drops_connection() {
            self.session.connected = false;
        } else if let Err(e) = self.engine.stop_current(guild_id).await {
            debug!(guild_id, error = %e, "stop before retry failed");
        }

        if attempts < self.policy.max_attempts {
            self.session.state = SessionState::Connecting;
            self.arm_timer(TimerKind::RetryBackoff, self.policy.retry_backoff);
        } else {
            let err = PlaybackError::Unrecoverable {
                title: item.title.clone(),
                attempts,
            };
            error!(guild_id, item = %item.title, attempts, last_cause = %cause, "retries exhausted");
            self.notify(err.to_string()).await;
            self.terminate(EndReason::Unrecoverable).await;
        }
    }

    async fn terminate(&mut self, reason: EndReason) {
        if self.session.state == SessionState::Terminated {
            return;
        }
        let guild_id = self.guild_id();
        self.cancel_timer();
        if let Err(e) = self.engine.disconnect(guild_id).await {
            warn!(guild_id, error = %e, "engine disconnect failed during teardown");
        }
        self.session.clear();
        self.session.connected = false;
        self.session.state = SessionState::Terminated;
        self.session.touch();
        self.publish_snapshot().await;

        let generation = self.generation;
        self.registry.remove_if(&guild_id, |_, handle| handle.generation == generation);
        self.rx.close();

        info!(guild_id, %reason, "session terminated");
        self.bus
            .publish(BotEvent::SessionEnded {
                guild_id,
                reason: reason.to_string(),
                timestamp: chrono::Utc::now(),
            })
            .await;
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    fn arm_timer(&mut self, kind: TimerKind, after: Duration) {
        self.timer = Some(ScheduledTask {
            deadline: Instant::now() + after,
            kind,
        });
    }

    fn cancel_timer(&mut self) {
        if let Some(task) = self.timer.take() {
            debug!(guild_id = self.guild_id(), timer = ?task.kind, "timer cancelled");
        }
    }

    async fn notify(&self, message: String) {
        self.bus
            .notify(self.guild_id(), self.session.text_channel_id, message)
            .await;
    }

    async fn publish_snapshot(&mut self) {
        let snapshot = self.session.snapshot();
        let changed = self.snapshot_tx.send_if_modified(|current| {
            if *current != snapshot {
                *current = snapshot.clone();
                true
            } else {
                false
            }
        });
        if changed {
            self.bus.publish(BotEvent::SessionUpdated(snapshot)).await;
        }
    }
}
