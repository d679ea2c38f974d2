// src/lib.rs

pub mod config;
pub mod dashboard;
pub mod eventbus;
pub mod platforms;
pub mod services;
pub mod tasks;

pub use config::BotConfig;
pub use tunebot_common::error::Error;
