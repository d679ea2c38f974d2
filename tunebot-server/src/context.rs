//! tunebot-server/src/context.rs
//!
//! Builds everything the running bot holds on to: config, event bus,
//! Discord platform, playback engine, reconciler and command router.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use tunebot_core::eventbus::EventBus;
use tunebot_core::platforms::discord::{DiscordPlatform, SongbirdEngine};
use tunebot_core::services::{CommandRouter, SessionReconciler};
use tunebot_core::{BotConfig, Error};

use crate::Args;

pub struct ServerContext {
    pub config: BotConfig,
    pub event_bus: EventBus,
    pub platform: DiscordPlatform,
    pub reconciler: Arc<SessionReconciler>,
    pub router: Arc<CommandRouter>,
    pub event_pump: JoinHandle<()>,
}

impl ServerContext {
    pub async fn new(args: &Args) -> Result<Self, Error> {
        let mut config = BotConfig::from_env()?;
        if let Some(prefix) = &args.prefix {
            config.command_prefix = prefix.clone();
        }
        if let Some(addr) = args.dashboard_addr {
            config.dashboard_addr = Some(addr);
        }
        if args.no_dashboard {
            config.dashboard_addr = None;
        }
        info!(
            prefix = %config.command_prefix,
            dashboard = ?config.dashboard_addr,
            max_attempts = config.playback.max_attempts,
            "configuration loaded"
        );

        let event_bus = EventBus::new();

        // Songbird needs the gateway shards, the engine needs songbird, and
        // the shard runners need the router built on top of the engine.
        let mut platform = DiscordPlatform::new(config.discord_token.clone());
        let songbird = platform.prepare().await?;

        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(SongbirdEngine::new(songbird, engine_tx));
        let reconciler = SessionReconciler::new(engine, event_bus.clone(), config.playback.clone());
        let event_pump = reconciler.spawn_event_pump(engine_rx);

        let router = Arc::new(CommandRouter::new(reconciler.clone(), config.command_prefix.clone()));
        platform.set_router(router.clone());

        Ok(Self {
            config,
            event_bus,
            platform,
            reconciler,
            router,
            event_pump,
        })
    }
}
