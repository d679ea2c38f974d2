// File: tunebot-core/tests/test_utils/mod.rs
//
// A scripted playback engine and a small harness around the reconciler.
// Tests run on paused tokio time, so backoffs and timeouts cost nothing.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use tunebot_common::models::{
    ChannelId, EngineErrorClass, EngineEvent, EngineEventKind, GuildId, PlayToken, QueueItem,
    SessionSnapshot, SessionState, TrackMetadata,
};
use tunebot_common::traits::PlaybackEngine;
use tunebot_common::EngineError;
use tunebot_core::eventbus::{BotEvent, EventBus};
use tunebot_core::services::{PlayOutcome, PlayRequest, PlaybackPolicy, SessionReconciler};

pub const GUILD: GuildId = 1;
pub const VOICE: ChannelId = 10;
pub const TEXT: ChannelId = 20;

/// Generous upper bound for anything a test waits on (virtual time).
const WAIT: Duration = Duration::from_secs(300);

/// What the engine does when asked to play a given title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Report the item as started with an audio resource.
    AutoStart,
    /// Report the item as started, but without an audio resource.
    MissingResource,
    /// Accept the request and never report anything.
    Silent,
    /// Refuse the play request outright.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Search(String),
    Connect { guild_id: GuildId, channel_id: ChannelId },
    Play { guild_id: GuildId, title: String, token: PlayToken },
    StopCurrent(GuildId),
    Pause(GuildId),
    Resume(GuildId),
    SetVolume(GuildId, u8),
    Disconnect(GuildId),
}

pub struct ScriptedEngine {
    events: mpsc::UnboundedSender<EngineEvent>,
    calls: Mutex<Vec<EngineCall>>,
    /// Per-title behaviors, consumed front to back; the last one sticks.
    scripts: Mutex<HashMap<String, VecDeque<Behavior>>>,
    durations: Mutex<HashMap<String, Option<u64>>>,
    connect_failures: Mutex<u32>,
    tokens: Mutex<HashMap<GuildId, PlayToken>>,
    plays: watch::Sender<usize>,
}

impl ScriptedEngine {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (plays, _) = watch::channel(0);
        let engine = Arc::new(Self {
            events: tx,
            calls: Mutex::new(Vec::new()),
            scripts: Mutex::new(HashMap::new()),
            durations: Mutex::new(HashMap::new()),
            connect_failures: Mutex::new(0),
            tokens: Mutex::new(HashMap::new()),
            plays,
        });
        (engine, rx)
    }

    pub fn script(&self, title: &str, behaviors: &[Behavior]) {
        self.scripts
            .lock()
            .unwrap()
            .insert(title.to_string(), behaviors.iter().copied().collect());
    }

    pub fn set_duration(&self, title: &str, seconds: Option<u64>) {
        self.durations.lock().unwrap().insert(title.to_string(), seconds);
    }

    pub fn fail_next_connects(&self, count: u32) {
        *self.connect_failures.lock().unwrap() = count;
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Titles passed to `play`, in order.
    pub fn plays(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::Play { title, .. } => Some(title),
                _ => None,
            })
            .collect()
    }

    pub fn play_count_of(&self, title: &str) -> usize {
        self.plays().iter().filter(|t| *t == title).count()
    }

    pub fn count(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn connect_count(&self) -> usize {
        self.count(|c| matches!(c, EngineCall::Connect { .. }))
    }

    pub fn disconnect_count(&self) -> usize {
        self.count(|c| matches!(c, EngineCall::Disconnect(_)))
    }

    pub fn last_token(&self, guild_id: GuildId) -> PlayToken {
        *self
            .tokens
            .lock()
            .unwrap()
            .get(&guild_id)
            .expect("nothing was played in this guild")
    }

    pub fn emit(&self, guild_id: GuildId, kind: EngineEventKind) {
        self.events
            .send(EngineEvent::new(guild_id, kind))
            .expect("event pump stopped");
    }

    /// Reports the most recent play attempt as finished.
    pub fn finish_current(&self, guild_id: GuildId) {
        let token = self.last_token(guild_id);
        self.emit(guild_id, EngineEventKind::ItemFinished { token });
    }

    pub fn fail_current(&self, guild_id: GuildId, class: EngineErrorClass) {
        let token = self.last_token(guild_id);
        self.emit(
            guild_id,
            EngineEventKind::Error {
                token: Some(token),
                class,
                message: "stream broke".into(),
            },
        );
    }

    /// Resolves once `play` has been called at least `n` times in total.
    pub async fn wait_for_plays(&self, n: usize) {
        let mut rx = self.plays.subscribe();
        timeout(WAIT, rx.wait_for(|count| *count >= n))
            .await
            .expect("timed out waiting for play calls")
            .expect("play counter closed");
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_behavior(&self, title: &str) -> Behavior {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(title) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Behavior::AutoStart),
            Some(queue) => queue.front().copied().unwrap_or(Behavior::AutoStart),
            None => Behavior::AutoStart,
        }
    }
}

#[async_trait]
impl PlaybackEngine for ScriptedEngine {
    async fn search(&self, query: &str) -> Result<Vec<TrackMetadata>, EngineError> {
        self.record(EngineCall::Search(query.to_string()));
        if query.starts_with("missing") {
            return Err(EngineError::NotFound(query.to_string()));
        }
        let duration = self
            .durations
            .lock()
            .unwrap()
            .get(query)
            .copied()
            .unwrap_or(Some(180));
        Ok(vec![TrackMetadata {
            title: query.to_string(),
            author: "Test Artist".into(),
            duration_seconds: duration,
            source_url: format!("https://example.com/{}", query.replace(' ', "-")),
        }])
    }

    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), EngineError> {
        self.record(EngineCall::Connect { guild_id, channel_id });
        let mut failures = self.connect_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(EngineError::Connection("voice server unreachable".into()));
        }
        Ok(())
    }

    async fn play(&self, guild_id: GuildId, item: &QueueItem, token: PlayToken) -> Result<(), EngineError> {
        self.record(EngineCall::Play {
            guild_id,
            title: item.title.clone(),
            token,
        });
        self.tokens.lock().unwrap().insert(guild_id, token);
        self.plays.send_modify(|count| *count += 1);

        match self.next_behavior(&item.title) {
            Behavior::AutoStart => self.emit(
                guild_id,
                EngineEventKind::ItemStarted {
                    token,
                    resource_present: true,
                },
            ),
            Behavior::MissingResource => self.emit(
                guild_id,
                EngineEventKind::ItemStarted {
                    token,
                    resource_present: false,
                },
            ),
            Behavior::Silent => {}
            Behavior::Reject => return Err(EngineError::Playback("decoder unavailable".into())),
        }
        Ok(())
    }

    async fn stop_current(&self, guild_id: GuildId) -> Result<(), EngineError> {
        self.record(EngineCall::StopCurrent(guild_id));
        Ok(())
    }

    async fn pause(&self, guild_id: GuildId) -> Result<(), EngineError> {
        self.record(EngineCall::Pause(guild_id));
        Ok(())
    }

    async fn resume(&self, guild_id: GuildId) -> Result<(), EngineError> {
        self.record(EngineCall::Resume(guild_id));
        Ok(())
    }

    async fn set_volume(&self, guild_id: GuildId, volume: u8) -> Result<(), EngineError> {
        self.record(EngineCall::SetVolume(guild_id, volume));
        Ok(())
    }

    async fn disconnect(&self, guild_id: GuildId) -> Result<(), EngineError> {
        self.record(EngineCall::Disconnect(guild_id));
        Ok(())
    }
}

/// A reconciler wired to a scripted engine and its own event bus.
pub struct Harness {
    pub engine: Arc<ScriptedEngine>,
    pub reconciler: Arc<SessionReconciler>,
    pub bus: EventBus,
    pump: JoinHandle<()>,
}

pub fn harness() -> Harness {
    harness_with(PlaybackPolicy::default())
}

pub fn harness_with(policy: PlaybackPolicy) -> Harness {
    let (engine, events) = ScriptedEngine::new();
    let bus = EventBus::new();
    let reconciler = SessionReconciler::new(engine.clone(), bus.clone(), policy);
    let pump = reconciler.spawn_event_pump(events);
    Harness {
        engine,
        reconciler,
        bus,
        pump,
    }
}

pub fn request(query: &str) -> PlayRequest {
    PlayRequest {
        guild_id: GUILD,
        voice_channel_id: VOICE,
        text_channel_id: Some(TEXT),
        query: query.to_string(),
        requested_by: "tester".to_string(),
    }
}

impl Harness {
    pub async fn play(&self, query: &str) -> PlayOutcome {
        self.reconciler
            .request_play(request(query))
            .await
            .expect("play request should succeed")
    }

    /// Plays `query` and waits until it is audible.
    pub async fn play_and_start(&self, query: &str) -> PlayOutcome {
        let before = self.engine.plays().len();
        let outcome = self.play(query).await;
        self.engine.wait_for_plays(before + 1).await;
        self.wait_for(GUILD, |s| s.state == SessionState::Playing).await;
        outcome
    }

    pub async fn wait_for<F>(&self, guild_id: GuildId, pred: F) -> SessionSnapshot
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut rx = self
            .reconciler
            .watch_session(guild_id)
            .expect("guild should have a session");
        timeout(WAIT, rx.wait_for(pred))
            .await
            .expect("timed out waiting for session state")
            .expect("session closed before reaching the expected state")
            .clone()
    }

    /// Polls until the session has left the session table.
    pub async fn wait_until_gone(&self, guild_id: GuildId) {
        timeout(WAIT, async {
            while self.reconciler.get_snapshot(guild_id).is_some() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .expect("session should have terminated");
    }

    pub async fn subscribe(&self) -> mpsc::Receiver<BotEvent> {
        self.bus.subscribe(None).await
    }
}

/// Every notification message already delivered to `rx`.
pub fn drain_notifications(rx: &mut mpsc::Receiver<BotEvent>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let BotEvent::Notification { message, .. } = event {
            out.push(message);
        }
    }
    out
}
