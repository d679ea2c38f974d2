//! songbird.rs
//!
//! `PlaybackEngine` backed by songbird. Joins voice channels through the
//! twilight gateway, streams with yt-dlp, and turns songbird's track and
//! driver events into `EngineEvent`s.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client as ReqwestClient;
use songbird::input::{Compose, YoutubeDl};
use songbird::tracks::{PlayMode, TrackHandle};
use songbird::{
    CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use twilight_model::id::marker::{ChannelMarker, GuildMarker};
use twilight_model::id::Id;

use tunebot_common::models::{
    ChannelId, EngineErrorClass, EngineEvent, EngineEventKind, GuildId, PlayToken, QueueItem,
    TrackMetadata,
};
use tunebot_common::traits::PlaybackEngine;
use tunebot_common::EngineError;

fn guild_marker(guild_id: GuildId) -> Result<Id<GuildMarker>, EngineError> {
    Id::new_checked(guild_id).ok_or_else(|| EngineError::Connection(format!("invalid guild id {guild_id}")))
}

fn channel_marker(channel_id: ChannelId) -> Result<Id<ChannelMarker>, EngineError> {
    Id::new_checked(channel_id)
        .ok_or_else(|| EngineError::Connection(format!("invalid channel id {channel_id}")))
}

pub struct SongbirdEngine {
    songbird: Arc<Songbird>,
    http: ReqwestClient,
    events: UnboundedSender<EngineEvent>,
    tracks: DashMap<GuildId, TrackHandle>,
    volumes: DashMap<GuildId, u8>,
    /// Guilds whose `Call` already carries our driver event handlers.
    hooked: DashMap<GuildId, ()>,
}

impl SongbirdEngine {
    pub fn new(songbird: Arc<Songbird>, events: UnboundedSender<EngineEvent>) -> Self {
        Self {
            songbird,
            http: ReqwestClient::new(),
            events,
            tracks: DashMap::new(),
            volumes: DashMap::new(),
            hooked: DashMap::new(),
        }
    }

    fn track(&self, guild_id: GuildId) -> Result<TrackHandle, EngineError> {
        self.tracks
            .get(&guild_id)
            .map(|t| t.value().clone())
            .ok_or_else(|| EngineError::Playback("no active track".into()))
    }
}

#[async_trait]
impl PlaybackEngine for SongbirdEngine {
    async fn search(&self, query: &str) -> Result<Vec<TrackMetadata>, EngineError> {
        let mut source = if query.starts_with("http") {
            YoutubeDl::new(self.http.clone(), query.to_string())
        } else {
            YoutubeDl::new_search(self.http.clone(), query.to_string())
        };
        let meta = source
            .aux_metadata()
            .await
            .map_err(|e| EngineError::NotFound(format!("{query}: {e}")))?;

        let Some(source_url) = meta.source_url.clone() else {
            return Err(EngineError::NotFound(query.to_string()));
        };
        Ok(vec![TrackMetadata {
            title: meta.title.or(meta.track).unwrap_or_else(|| "Unknown title".into()),
            author: meta
                .artist
                .or(meta.channel)
                .unwrap_or_else(|| "Unknown artist".into()),
            duration_seconds: meta.duration.map(|d| d.as_secs()),
            source_url,
        }])
    }

    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), EngineError> {
        let call = self
            .songbird
            .join(guild_marker(guild_id)?, channel_marker(channel_id)?)
            .await
            .map_err(|e| EngineError::Connection(e.to_string()))?;

        if self.hooked.insert(guild_id, ()).is_none() {
            let mut call = call.lock().await;
            for event in [CoreEvent::DriverConnect, CoreEvent::DriverReconnect, CoreEvent::DriverDisconnect] {
                call.add_global_event(
                    Event::Core(event),
                    DriverNotifier {
                        guild_id,
                        events: self.events.clone(),
                    },
                );
            }
        }
        info!(guild_id, channel_id, "joined voice channel");
        Ok(())
    }

    async fn play(&self, guild_id: GuildId, item: &QueueItem, token: PlayToken) -> Result<(), EngineError> {
        let call = self
            .songbird
            .get(guild_marker(guild_id)?)
            .ok_or_else(|| EngineError::Connection("not in a voice channel".into()))?;

        let source = YoutubeDl::new(self.http.clone(), item.source_url.clone());
        let handle = {
            let mut call = call.lock().await;
            call.stop();
            call.play_input(source.into())
        };

        for signal in [TrackSignal::Playable, TrackSignal::End, TrackSignal::Error] {
            let notifier = TrackNotifier {
                guild_id,
                token,
                signal,
                events: self.events.clone(),
            };
            handle
                .add_event(Event::Track(signal.track_event()), notifier)
                .map_err(|e| EngineError::Playback(e.to_string()))?;
        }

        let volume = self.volumes.get(&guild_id).map(|v| *v).unwrap_or(100);
        if let Err(e) = handle.set_volume(f32::from(volume) / 100.0) {
            warn!(guild_id, error = %e, "could not apply volume to new track");
        }

        debug!(guild_id, %token, url = %item.source_url, "track handed to songbird");
        self.tracks.insert(guild_id, handle);
        Ok(())
    }

    async fn stop_current(&self, guild_id: GuildId) -> Result<(), EngineError> {
        if let Some((_, handle)) = self.tracks.remove(&guild_id) {
            handle.stop().map_err(|e| EngineError::Playback(e.to_string()))?;
        }
        Ok(())
    }

    async fn pause(&self, guild_id: GuildId) -> Result<(), EngineError> {
        self.track(guild_id)?
            .pause()
            .map_err(|e| EngineError::Playback(e.to_string()))
    }

    async fn resume(&self, guild_id: GuildId) -> Result<(), EngineError> {
        self.track(guild_id)?
            .play()
            .map_err(|e| EngineError::Playback(e.to_string()))
    }

    async fn set_volume(&self, guild_id: GuildId, volume: u8) -> Result<(), EngineError> {
        self.volumes.insert(guild_id, volume);
        if let Some(handle) = self.tracks.get(&guild_id) {
            handle
                .set_volume(f32::from(volume) / 100.0)
                .map_err(|e| EngineError::Playback(e.to_string()))?;
        }
        Ok(())
    }

    async fn disconnect(&self, guild_id: GuildId) -> Result<(), EngineError> {
        self.tracks.remove(&guild_id);
        self.volumes.remove(&guild_id);
        self.hooked.remove(&guild_id);
        let guild = guild_marker(guild_id)?;
        if self.songbird.get(guild).is_some() {
            self.songbird
                .remove(guild)
                .await
                .map_err(|e| EngineError::Connection(e.to_string()))?;
            info!(guild_id, "left voice channel");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum TrackSignal {
    Playable,
    End,
    Error,
}

impl TrackSignal {
    fn track_event(self) -> TrackEvent {
        match self {
            TrackSignal::Playable => TrackEvent::Playable,
            TrackSignal::End => TrackEvent::End,
            TrackSignal::Error => TrackEvent::Error,
        }
    }
}

struct TrackNotifier {
    guild_id: GuildId,
    token: PlayToken,
    signal: TrackSignal,
    events: UnboundedSender<EngineEvent>,
}

#[async_trait]
impl VoiceEventHandler for TrackNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let kind = match self.signal {
            TrackSignal::Playable => EngineEventKind::ItemStarted {
                token: self.token,
                resource_present: true,
            },
            TrackSignal::End => EngineEventKind::ItemFinished { token: self.token },
            TrackSignal::Error => {
                let message = match ctx {
                    EventContext::Track(tracks) => tracks
                        .first()
                        .map(|(state, _)| match &state.playing {
                            PlayMode::Errored(e) => format!("{e:?}"),
                            other => format!("{other:?}"),
                        })
                        .unwrap_or_else(|| "track error".into()),
                    _ => "track error".into(),
                };
                EngineEventKind::Error {
                    token: Some(self.token),
                    class: EngineErrorClass::Transient,
                    message,
                }
            }
        };
        let _ = self.events.send(EngineEvent::new(self.guild_id, kind));
        None
    }
}

struct DriverNotifier {
    guild_id: GuildId,
    events: UnboundedSender<EngineEvent>,
}

#[async_trait]
impl VoiceEventHandler for DriverNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let kind = match ctx {
            EventContext::DriverConnect(_) | EventContext::DriverReconnect(_) => EngineEventKind::ConnectionCreated,
            EventContext::DriverDisconnect(_) => EngineEventKind::ConnectionDestroyed,
            _ => return None,
        };
        let _ = self.events.send(EngineEvent::new(self.guild_id, kind));
        None
    }
}
