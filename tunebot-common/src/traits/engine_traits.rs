// ========================================================
// File: tunebot-common/src/traits/engine_traits.rs
// ========================================================
//! Narrow facade between the session reconciler and whatever library
//! actually joins voice channels and streams audio.
//!
//! Calls return once the engine has *accepted* the request. Whether audio is
//! really flowing is reported later through [`EngineEvent`]s carrying the
//! [`PlayToken`] passed to [`PlaybackEngine::play`].
//!
//! [`EngineEvent`]: crate::models::EngineEvent

use async_trait::async_trait;

use crate::error::EngineError;
use crate::models::{ChannelId, GuildId, PlayToken, QueueItem, TrackMetadata};

#[async_trait]
pub trait PlaybackEngine: Send + Sync {
    /// Resolve a query or URL into playable candidates, best match first.
    /// An empty result is reported as `EngineError::NotFound`.
    async fn search(&self, query: &str) -> Result<Vec<TrackMetadata>, EngineError>;

    /// Join (or re-join) the given voice channel.
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), EngineError>;

    /// Start streaming `item`, replacing anything currently playing.
    async fn play(&self, guild_id: GuildId, item: &QueueItem, token: PlayToken) -> Result<(), EngineError>;

    /// Halt the current stream without leaving the channel.
    async fn stop_current(&self, guild_id: GuildId) -> Result<(), EngineError>;

    async fn pause(&self, guild_id: GuildId) -> Result<(), EngineError>;

    async fn resume(&self, guild_id: GuildId) -> Result<(), EngineError>;

    /// `volume` is a percentage, 0..=100.
    async fn set_volume(&self, guild_id: GuildId, volume: u8) -> Result<(), EngineError>;

    /// Leave the voice channel and release engine resources for the guild.
    async fn disconnect(&self, guild_id: GuildId) -> Result<(), EngineError>;
}
