// tunebot-core/src/tasks/notification_relay.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use tunebot_common::models::{ChannelId, GuildId};

use crate::eventbus::{BotEvent, EventBus};
use crate::platforms::MessageSink;

/// Upper bound for a single message send before it is given up on.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

type Outbox = mpsc::UnboundedSender<(GuildId, String)>;

/// Subscribes to the event bus and posts every session notification to the
/// session's text channel. Runs until the bus shuts down.
///
/// Each text channel gets its own writer task, so messages for a channel go
/// out in publish order while a slow channel never holds up the others or
/// the bus subscription.
pub async fn spawn_notification_relay(bus: EventBus, sink: Arc<dyn MessageSink>) -> JoinHandle<()> {
    let mut rx = bus.subscribe(None).await;
    let mut shutdown_rx = bus.shutdown_rx.clone();

    tokio::spawn(async move {
        let mut outboxes: HashMap<ChannelId, Outbox> = HashMap::new();
        loop {
            tokio::select! {
                maybe_event = rx.recv() => {
                    let Some(event) = maybe_event else { break };
                    let BotEvent::Notification { guild_id, text_channel_id, message } = event else {
                        continue;
                    };
                    let Some(channel_id) = text_channel_id else {
                        debug!(guild_id, %message, "notification without a text channel; dropped");
                        continue;
                    };
                    let outbox = outboxes
                        .entry(channel_id)
                        .or_insert_with(|| spawn_channel_writer(channel_id, sink.clone()));
                    if outbox.send((guild_id, message)).is_err() {
                        warn!(guild_id, channel_id, "channel writer stopped; notification dropped");
                        outboxes.remove(&channel_id);
                    }
                }
                Ok(_) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Notification relay stopped.");
    })
}

/// Sends one channel's messages strictly in order. Ends once the relay drops
/// its outbox and everything queued has been sent.
fn spawn_channel_writer(channel_id: ChannelId, sink: Arc<dyn MessageSink>) -> Outbox {
    let (tx, mut rx) = mpsc::unbounded_channel::<(GuildId, String)>();
    tokio::spawn(async move {
        while let Some((guild_id, message)) = rx.recv().await {
            match timeout(SEND_TIMEOUT, sink.send_message(channel_id, &message)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(guild_id, channel_id, error = %e, "failed to deliver notification"),
                Err(_) => warn!(guild_id, channel_id, "notification send timed out"),
            }
        }
        debug!(channel_id, "channel writer finished");
    });
    tx
}
