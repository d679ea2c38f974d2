// File: src/services/mod.rs

pub mod command_router;
pub mod playback;

pub use command_router::{CommandContext, CommandRouter};
pub use playback::{PlayOutcome, PlayRequest, PlaybackPolicy, SessionReconciler};
