pub mod runtime;
pub mod songbird;

pub use runtime::{DiscordMessageSink, DiscordPlatform};
pub use self::songbird::SongbirdEngine;
