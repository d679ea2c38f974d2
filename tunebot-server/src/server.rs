//! tunebot-server/src/server.rs
//!
//! Starts the Discord shards, the notification relay and the dashboard,
//! then waits for Ctrl-C and tears everything down in order.

use std::sync::Arc;

use tracing::{error, info, warn};

use tunebot_core::dashboard::{spawn_dashboard, DashboardState};
use tunebot_core::platforms::{MessageSink, PlatformIntegration};
use tunebot_core::tasks::spawn_notification_relay;
use tunebot_core::Error;

use crate::context::ServerContext;
use crate::Args;

pub async fn run_server(args: Args) -> Result<(), Error> {
    let mut ctx = ServerContext::new(&args).await?;

    // 1) Notifications go out through the REST client.
    let sink: Arc<dyn MessageSink> = match ctx.platform.message_sink() {
        Some(sink) => Arc::new(sink),
        None => return Err(Error::Platform("Discord client was not prepared".into())),
    };
    let relay_handle = spawn_notification_relay(ctx.event_bus.clone(), sink).await;

    // 2) Dashboard
    let dashboard_handle = ctx.config.dashboard_addr.map(|addr| {
        spawn_dashboard(
            addr,
            DashboardState {
                reconciler: ctx.reconciler.clone(),
                bus: ctx.event_bus.clone(),
            },
        )
    });

    // 3) Gateway
    ctx.platform.connect().await?;
    info!("Listening for commands with prefix '{}'", ctx.router.prefix());

    // 4) Ctrl-C => shutdown
    let eb_for_ctrlc = ctx.event_bus.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {:?}", e);
        }
        info!("Ctrl-C detected; shutting down event bus...");
        eb_for_ctrlc.shutdown();
    });

    ctx.event_bus.wait_for_shutdown().await;
    info!("Shutdown signaled; leaving voice channels.");

    ctx.reconciler.shutdown().await;

    if let Err(e) = ctx.platform.disconnect().await {
        warn!("Discord disconnect error: {:?}", e);
    }
    if let Some(handle) = dashboard_handle {
        let _ = handle.await;
    }
    let _ = relay_handle.await;
    ctx.event_pump.abort();

    info!("Server shutdown complete.");
    Ok(())
}
