// File: tunebot-core/src/services/playback/mod.rs
//
// Per-guild playback sessions: the session record, the actor that owns it,
// and the reconciler that routes commands and engine events to actors.

mod actor;
pub mod policy;
pub mod reconciler;
pub mod resolver;
pub mod session;

pub use actor::PlayOutcome;
pub use policy::PlaybackPolicy;
pub use reconciler::{PlayRequest, SessionReconciler};
pub use resolver::QueryResolver;
pub use session::Session;
