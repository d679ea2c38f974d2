// File: tunebot-core/src/services/playback/policy.rs

use std::time::Duration;

/// Timing and retry bounds for a playback session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackPolicy {
    /// Total play attempts for one item (the first try included) before a
    /// session-level failure becomes unrecoverable.
    pub max_attempts: u32,
    /// Pause before re-issuing a failed play request.
    pub retry_backoff: Duration,
    /// Audible time after which a failure is blamed on the item rather than
    /// on the connection.
    pub min_audible: Duration,
    /// How long to wait for the engine to report a started item with an
    /// audio resource.
    pub resource_timeout: Duration,
    /// Grace period between queue exhaustion and teardown.
    pub idle_timeout: Duration,
    /// Delay before skipping an item that failed mid-stream.
    pub skip_delay: Duration,
    pub search_attempts: u32,
    pub search_retry_delay: Duration,
}

impl Default for PlaybackPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            min_audible: Duration::from_secs(10),
            resource_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            skip_delay: Duration::from_secs(2),
            search_attempts: 3,
            search_retry_delay: Duration::from_secs(1),
        }
    }
}
