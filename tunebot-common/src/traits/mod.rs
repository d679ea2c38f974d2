pub mod engine_traits;

pub use engine_traits::PlaybackEngine;
