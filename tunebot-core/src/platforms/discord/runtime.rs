use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use songbird::shards::TwilightMap;
use songbird::Songbird;
use twilight_cache_inmemory::{InMemoryCache, ResourceType};
use twilight_gateway::{
    self as gateway,
    CloseFrame,
    Config,
    Event,
    EventTypeFlags,
    Intents,
    MessageSender,
    Shard,
    StreamExt,
};
use twilight_http::client::ClientBuilder;
use twilight_http::Client as HttpClient;
use twilight_model::gateway::payload::incoming::{MessageCreate, Ready as ReadyPayload};
use twilight_model::id::marker::ChannelMarker;
use twilight_model::id::Id;

use tunebot_common::models::ChannelId;

use crate::platforms::{ConnectionStatus, MessageSink, PlatformIntegration};
use crate::services::{CommandContext, CommandRouter};
use crate::Error;

/// The shard runner:
///   - calls `shard.next_event(...)`
///   - updates the in-memory cache and feeds songbird's voice state
///   - routes prefixed guild messages to the `CommandRouter`.
async fn shard_runner(
    mut shard: Shard,
    http: Arc<HttpClient>,
    cache: Arc<InMemoryCache>,
    songbird: Arc<Songbird>,
    router: Arc<CommandRouter>,
) {
    let shard_id = shard.id().number();
    info!("(ShardRunner) Shard {shard_id} started. Listening for events.");

    while let Some(item) = shard.next_event(EventTypeFlags::all()).await {
        let event = match item {
            Ok(event) => event,
            Err(err) => {
                error!("Shard {shard_id} => error receiving event: {err:?}");
                continue;
            }
        };

        cache.update(&event);
        songbird.process(&event).await;

        match &event {
            Event::Ready(ready) => {
                let data: &ReadyPayload = ready.as_ref();
                info!(
                    "Shard {shard_id} => READY as {} (ID={}, guilds={})",
                    data.user.name,
                    data.user.id,
                    data.guilds.len()
                );
            }
            Event::MessageCreate(msg_create) => {
                let msg: &MessageCreate = msg_create;
                if msg.author.bot {
                    continue;
                }
                let Some(guild_id) = msg.guild_id else {
                    trace!("Ignoring direct message from {}", msg.author.name);
                    continue;
                };
                if !msg.content.trim_start().starts_with(router.prefix()) {
                    continue;
                }

                let voice_channel_id = cache
                    .voice_state(msg.author.id, guild_id)
                    .map(|state| state.channel_id().get());
                let ctx = CommandContext {
                    guild_id: guild_id.get(),
                    channel_id: msg.channel_id.get(),
                    author: msg.author.name.clone(),
                    voice_channel_id,
                };
                let content = msg.content.clone();
                let channel_id = msg.channel_id;
                let router = router.clone();
                let http = http.clone();

                // Commands may wait on search and voice joins; keep the shard loop free.
                tokio::spawn(async move {
                    if let Some(reply) = router.handle(&ctx, &content).await {
                        if let Err(e) = http.create_message(channel_id).content(&reply).await {
                            warn!("Failed to reply in channel {channel_id}: {e:?}");
                        }
                    }
                });
            }
            _ => {
                trace!("Shard {shard_id} => unhandled event kind {:?}", event.kind());
            }
        }
    }

    warn!("(ShardRunner) Shard {shard_id} event loop ended.");
}

/// Posts text to Discord channels through the REST client.
#[derive(Clone)]
pub struct DiscordMessageSink {
    http: Arc<HttpClient>,
}

impl DiscordMessageSink {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl MessageSink for DiscordMessageSink {
    async fn send_message(&self, channel_id: ChannelId, message: &str) -> Result<(), Error> {
        let channel = Id::<ChannelMarker>::new_checked(channel_id)
            .ok_or_else(|| Error::Platform(format!("Invalid channel ID: {channel_id}")))?;
        self.http
            .create_message(channel)
            .content(message)
            .await
            .map_err(|e| Error::Platform(format!("Error sending Discord message: {e:?}")))?;
        Ok(())
    }
}

/// Gateway shards, REST client, cache and the songbird voice manager.
///
/// Startup is two-phase: `prepare` builds the shards and songbird (the
/// playback engine needs songbird before the command router exists), then
/// `connect` starts the shard runners once a router has been set.
pub struct DiscordPlatform {
    pub token: String,
    pub connection_status: ConnectionStatus,

    pub shard_tasks: Vec<JoinHandle<()>>,
    pub shard_senders: Vec<MessageSender>,
    pending_shards: Vec<Shard>,

    pub http: Option<Arc<HttpClient>>,
    pub cache: Option<Arc<InMemoryCache>>,
    pub songbird: Option<Arc<Songbird>>,
    router: Option<Arc<CommandRouter>>,
}

impl DiscordPlatform {
    pub fn new(token: String) -> Self {
        Self {
            token,
            connection_status: ConnectionStatus::Disconnected,
            shard_tasks: Vec::new(),
            shard_senders: Vec::new(),
            pending_shards: Vec::new(),
            http: None,
            cache: None,
            songbird: None,
            router: None,
        }
    }

    pub fn set_router(&mut self, router: Arc<CommandRouter>) {
        self.router = Some(router);
    }

    pub fn message_sink(&self) -> Option<DiscordMessageSink> {
        self.http.clone().map(DiscordMessageSink::new)
    }

    /// Builds the REST client, cache, shards and songbird. Returns the
    /// songbird manager for the playback engine.
    pub async fn prepare(&mut self) -> Result<Arc<Songbird>, Error> {
        if let Some(songbird) = &self.songbird {
            return Ok(songbird.clone());
        }
        if self.token.is_empty() {
            return Err(Error::Platform("Discord token is empty".into()));
        }

        let http_client = Arc::new(
            ClientBuilder::new()
                .token(self.token.clone())
                .timeout(Duration::from_secs(30))
                .build(),
        );

        let user_id = http_client
            .current_user()
            .await
            .map_err(|e| Error::Platform(format!("current_user error: {e}")))?
            .model()
            .await
            .map_err(|e| Error::Platform(format!("current_user decode error: {e}")))?
            .id;

        let cache = InMemoryCache::builder()
            .resource_types(ResourceType::GUILD | ResourceType::CHANNEL | ResourceType::VOICE_STATE)
            .build();

        let config = Config::new(
            self.token.clone(),
            Intents::GUILDS | Intents::GUILD_MESSAGES | Intents::MESSAGE_CONTENT | Intents::GUILD_VOICE_STATES,
        );

        let shards: Vec<Shard> = gateway::create_recommended(&http_client, config, |_, b| b.build())
            .await
            .map_err(|e| Error::Platform(format!("create_recommended error: {e}")))?
            .collect();
        info!("(DiscordPlatform) Prepared {} shard(s) for bot user {user_id}", shards.len());

        let senders = TwilightMap::new(shards.iter().map(|s| (s.id().number(), s.sender())).collect());
        let songbird = Arc::new(Songbird::twilight(Arc::new(senders), user_id));

        self.shard_senders = shards.iter().map(|s| s.sender()).collect();
        self.pending_shards = shards;
        self.http = Some(http_client);
        self.cache = Some(Arc::new(cache));
        self.songbird = Some(songbird.clone());
        Ok(songbird)
    }
}

#[async_trait]
impl PlatformIntegration for DiscordPlatform {
    async fn connect(&mut self) -> Result<(), Error> {
        if matches!(self.connection_status, ConnectionStatus::Connected) {
            info!("(DiscordPlatform) Already connected => skipping");
            return Ok(());
        }

        let songbird = self.prepare().await?;
        let router = self
            .router
            .clone()
            .ok_or_else(|| Error::Platform("no command router set".into()))?;
        let (Some(http), Some(cache)) = (self.http.clone(), self.cache.clone()) else {
            return Err(Error::Platform("Discord client was not prepared".into()));
        };

        for shard in self.pending_shards.drain(..) {
            let handle = tokio::spawn(shard_runner(
                shard,
                http.clone(),
                cache.clone(),
                songbird.clone(),
                router.clone(),
            ));
            self.shard_tasks.push(handle);
        }

        debug!("(DiscordPlatform) {} shard runner(s) spawned", self.shard_tasks.len());
        self.connection_status = ConnectionStatus::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Error> {
        self.connection_status = ConnectionStatus::Disconnected;

        // Gracefully close shards
        for sender in &self.shard_senders {
            let _ = sender.close(CloseFrame::NORMAL);
        }
        for task in &mut self.shard_tasks {
            let _ = task.await;
        }

        self.shard_senders.clear();
        self.shard_tasks.clear();
        Ok(())
    }
}
