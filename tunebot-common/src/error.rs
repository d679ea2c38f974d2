// ================================================================
// File: tunebot-common/src/error.rs
// ================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found error: {0}")]
    NotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    #[error("Timeout error: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Parse(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Parse(s.to_string())
    }
}

/// Failures reported by a playback engine implementation. Playback failures
/// are classified by the reconciler; only direct command calls (pause,
/// resume, volume) surface them wrapped in `PlaybackError::Engine`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("no results for '{0}'")]
    NotFound(String),

    #[error("voice connection failed: {0}")]
    Connection(String),

    #[error("playback failed: {0}")]
    Playback(String),
}

/// Outcome of a reconciler request. The `Display` text of each variant is
/// what ends up in front of the user.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("No results found for: {0}")]
    NotFound(String),

    #[error("Could not connect to the voice channel: {0}")]
    ConnectionError(String),

    #[error("Playback of '{0}' failed, skipping it.")]
    TransientPlaybackError(String),

    #[error("No audio arrived for '{0}' in time.")]
    ResourceCreationTimeout(String),

    #[error("Gave up on '{title}' after {attempts} attempts; leaving the voice channel.")]
    Unrecoverable { title: String, attempts: u32 },

    #[error("Nothing is playing right now.")]
    NoSession,

    #[error("Can't {action} while {state}.")]
    InvalidState { action: &'static str, state: String },

    #[error("Volume must be between 0 and 100 (got {0}).")]
    InvalidVolume(u32),

    #[error("The playback session is restarting, try again.")]
    SessionUnavailable,

    #[error("Playback engine error: {0}")]
    Engine(#[from] EngineError),
}
