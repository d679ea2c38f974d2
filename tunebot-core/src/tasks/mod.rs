// File: src/tasks/mod.rs

pub mod notification_relay;

pub use notification_relay::spawn_notification_relay;
