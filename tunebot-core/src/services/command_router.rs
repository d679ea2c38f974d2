// File: src/services/command_router.rs
//
// Prefix commands typed in a guild text channel, mapped onto reconciler
// requests. Replies are plain text; errors are rendered with their
// user-facing message.

use std::sync::Arc;

use tracing::{debug, info};

use tunebot_common::models::{ChannelId, GuildId, LoopMode, SessionSnapshot};
use tunebot_common::PlaybackError;

use crate::services::playback::{PlayOutcome, PlayRequest, SessionReconciler};

/// How many pending items `queue` lists before summarizing the rest.
const QUEUE_PREVIEW: usize = 10;

/// Who sent a command, and from where.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub author: String,
    /// The author's current voice channel, if they are in one.
    pub voice_channel_id: Option<ChannelId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play(String),
    Skip,
    Stop,
    Pause,
    Resume,
    Queue,
    NowPlaying,
    Loop(Option<String>),
    Volume(Option<String>),
    Voice,
    Help,
}

impl Command {
    /// Parses `content` if it starts with `prefix` and names a known command.
    pub fn parse(prefix: &str, content: &str) -> Option<Command> {
        let rest = content.trim().strip_prefix(prefix)?;
        let mut parts = rest.trim_start().splitn(2, char::is_whitespace);
        let name = parts.next()?.to_lowercase();
        let arg = parts
            .next()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string);

        let cmd = match name.as_str() {
            "play" | "p" => Command::Play(arg.unwrap_or_default()),
            "skip" | "s" => Command::Skip,
            "stop" | "leave" => Command::Stop,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "queue" | "q" => Command::Queue,
            "np" | "nowplaying" => Command::NowPlaying,
            "loop" => Command::Loop(arg),
            "volume" | "vol" => Command::Volume(arg),
            "voice" => Command::Voice,
            "help" => Command::Help,
            _ => return None,
        };
        Some(cmd)
    }
}

pub struct CommandRouter {
    reconciler: Arc<SessionReconciler>,
    prefix: String,
}

impl CommandRouter {
    pub fn new(reconciler: Arc<SessionReconciler>, prefix: impl Into<String>) -> Self {
        Self {
            reconciler,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Handles one chat message. `None` means the message was not a command
    /// and gets no reply.
    pub async fn handle(&self, ctx: &CommandContext, content: &str) -> Option<String> {
        let cmd = Command::parse(&self.prefix, content)?;
        debug!(guild_id = ctx.guild_id, author = %ctx.author, ?cmd, "command received");
        let reply = match self.dispatch(ctx, cmd).await {
            Ok(text) => text,
            Err(e) => e.to_string(),
        };
        Some(reply)
    }

    async fn dispatch(&self, ctx: &CommandContext, cmd: Command) -> Result<String, PlaybackError> {
        let guild_id = ctx.guild_id;
        match cmd {
            Command::Play(query) => self.play(ctx, query).await,
            Command::Skip => match self.reconciler.request_skip(guild_id).await? {
                Some(item) => Ok(format!("Skipped **{}**.", item.title)),
                None => Ok("Skipped.".to_string()),
            },
            Command::Stop => {
                if self.reconciler.request_stop(guild_id).await? {
                    Ok("Stopped playback and cleared the queue.".to_string())
                } else {
                    Ok("Nothing is playing.".to_string())
                }
            }
            Command::Pause => {
                self.reconciler.request_pause(guild_id).await?;
                Ok("Paused.".to_string())
            }
            Command::Resume => {
                self.reconciler.request_resume(guild_id).await?;
                Ok("Resumed.".to_string())
            }
            Command::Queue => {
                let snap = self.snapshot(guild_id)?;
                Ok(format_queue(&snap))
            }
            Command::NowPlaying => {
                let snap = self.snapshot(guild_id)?;
                match &snap.current_item {
                    Some(item) => Ok(format!(
                        "Now playing: **{}** by {} ({}) [{}]",
                        item.title,
                        item.author,
                        item.duration_label(),
                        snap.state
                    )),
                    None => Err(PlaybackError::NoSession),
                }
            }
            Command::Loop(arg) => {
                let mode = match arg {
                    Some(raw) => match raw.parse::<LoopMode>() {
                        Ok(mode) => mode,
                        Err(_) => return Ok(format!("Usage: `{}loop [off|track|queue]`", self.prefix)),
                    },
                    None => self.snapshot(guild_id)?.loop_mode.next(),
                };
                let mode = self.reconciler.set_loop_mode(guild_id, mode).await?;
                Ok(format!("Loop mode: **{mode}**"))
            }
            Command::Volume(arg) => {
                let Some(raw) = arg else {
                    let snap = self.snapshot(guild_id)?;
                    return Ok(format!("Volume: {}%", snap.volume));
                };
                let Ok(volume) = raw.trim_end_matches('%').parse::<u32>() else {
                    return Ok(format!("Usage: `{}volume <0-100>`", self.prefix));
                };
                let volume = self.reconciler.set_volume(guild_id, volume).await?;
                Ok(format!("Volume set to {volume}%"))
            }
            Command::Voice => Ok(match self.reconciler.get_snapshot(guild_id) {
                Some(snap) => format!(
                    "State: {} | connected: {} | voice channel: {} | retries: {}",
                    snap.state,
                    if snap.connected { "yes" } else { "no" },
                    snap.voice_channel_id
                        .map(|c| format!("<#{c}>"))
                        .unwrap_or_else(|| "none".into()),
                    snap.retry_count
                ),
                None => "Not connected to voice in this server.".to_string(),
            }),
            Command::Help => Ok(self.help_text()),
        }
    }

    async fn play(&self, ctx: &CommandContext, query: String) -> Result<String, PlaybackError> {
        if query.is_empty() {
            return Ok(format!("Usage: `{}play <song name or URL>`", self.prefix));
        }
        let Some(voice_channel_id) = ctx.voice_channel_id else {
            return Ok("You need to be in a voice channel to play music.".to_string());
        };

        info!(guild_id = ctx.guild_id, author = %ctx.author, %query, "play requested");
        let outcome = self
            .reconciler
            .request_play(PlayRequest {
                guild_id: ctx.guild_id,
                voice_channel_id,
                text_channel_id: Some(ctx.channel_id),
                query,
                requested_by: ctx.author.clone(),
            })
            .await?;

        Ok(match outcome {
            PlayOutcome::Starting { item } => format!("Loading **{}**...", item.title),
            PlayOutcome::Queued { item, position } => {
                format!("Queued **{}** at position {position}.", item.title)
            }
        })
    }

    fn snapshot(&self, guild_id: GuildId) -> Result<SessionSnapshot, PlaybackError> {
        self.reconciler
            .get_snapshot(guild_id)
            .ok_or(PlaybackError::NoSession)
    }

    fn help_text(&self) -> String {
        let p = &self.prefix;
        [
            format!("`{p}play <query>` play or queue a song"),
            format!("`{p}skip` skip the current song"),
            format!("`{p}stop` stop and leave the voice channel"),
            format!("`{p}pause` / `{p}resume`"),
            format!("`{p}queue` show the queue"),
            format!("`{p}np` show the current song"),
            format!("`{p}loop [off|track|queue]` set or cycle the loop mode"),
            format!("`{p}volume <0-100>` set the volume"),
            format!("`{p}voice` voice connection status"),
        ]
        .join("\n")
    }
}

/// Renders a session's queue for chat.
pub fn format_queue(snap: &SessionSnapshot) -> String {
    let mut lines = vec![format!("Loop: **{}**", snap.loop_mode)];
    match &snap.current_item {
        Some(item) => lines.push(format!(
            "Now playing: **{}** ({}) [{}]",
            item.title,
            item.duration_label(),
            snap.state
        )),
        None => lines.push("Nothing playing.".to_string()),
    }

    if snap.queue.is_empty() {
        lines.push("The queue is empty.".to_string());
    } else {
        lines.push("Up next:".to_string());
        for (i, item) in snap.queue.iter().take(QUEUE_PREVIEW).enumerate() {
            lines.push(format!(
                "{}. {} ({}) - requested by {}",
                i + 1,
                item.title,
                item.duration_label(),
                item.requested_by
            ));
        }
        if snap.queue.len() > QUEUE_PREVIEW {
            lines.push(format!("...and {} more", snap.queue.len() - QUEUE_PREVIEW));
        }
    }
    lines.join("\n")
}
