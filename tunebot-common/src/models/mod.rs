// File: tunebot-common/src/models/mod.rs
pub mod engine;
pub mod session;
pub mod track;

pub use engine::{EngineErrorClass, EngineEvent, EngineEventKind, PlayToken};
pub use session::{LoopMode, SessionSnapshot, SessionState};
pub use track::{QueueItem, TrackMetadata};

/// Discord guild (server) identifier.
pub type GuildId = u64;

/// Discord channel identifier (voice or text).
pub type ChannelId = u64;
