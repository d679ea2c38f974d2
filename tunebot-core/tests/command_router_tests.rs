// tests/command_router_tests.rs

mod test_utils;

use tunebot_common::models::{LoopMode, SessionState};
use tunebot_core::services::{CommandContext, CommandRouter};

use test_utils::*;

fn ctx(in_voice: bool) -> CommandContext {
    CommandContext {
        guild_id: GUILD,
        channel_id: TEXT,
        author: "alice".into(),
        voice_channel_id: in_voice.then_some(VOICE),
    }
}

fn setup() -> (Harness, CommandRouter) {
    let h = harness();
    let router = CommandRouter::new(h.reconciler.clone(), "!");
    (h, router)
}

async fn say(router: &CommandRouter, content: &str) -> String {
    router
        .handle(&ctx(true), content)
        .await
        .unwrap_or_else(|| panic!("expected a reply to {content:?}"))
}

#[tokio::test(start_paused = true)]
async fn test_non_commands_get_no_reply() {
    let (_h, router) = setup();
    assert!(router.handle(&ctx(true), "hello there").await.is_none());
    assert!(router.handle(&ctx(true), "!dance").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_play_requires_voice_channel() {
    let (h, router) = setup();

    let reply = router.handle(&ctx(false), "!play song a").await.unwrap();
    assert_eq!(reply, "You need to be in a voice channel to play music.");
    assert_eq!(h.reconciler.session_count(), 0);

    let reply = say(&router, "!play").await;
    assert_eq!(reply, "Usage: `!play <song name or URL>`");
}

#[tokio::test(start_paused = true)]
async fn test_play_then_queue() {
    let (h, router) = setup();

    assert_eq!(say(&router, "!play song a").await, "Loading **song a**...");
    h.wait_for(GUILD, |s| s.state == SessionState::Playing).await;
    assert_eq!(say(&router, "!p song b").await, "Queued **song b** at position 1.");

    let queue = say(&router, "!queue").await;
    assert!(queue.contains("Now playing: **song a** (3:00) [playing]"));
    assert!(queue.contains("1. song b (3:00) - requested by alice"));

    let np = say(&router, "!np").await;
    assert_eq!(np, "Now playing: **song a** by Test Artist (3:00) [playing]");
}

#[tokio::test(start_paused = true)]
async fn test_play_unknown_song() {
    let (_h, router) = setup();
    let reply = say(&router, "!play missing thing").await;
    assert_eq!(reply, "No results found for: missing thing");
}

#[tokio::test(start_paused = true)]
async fn test_commands_without_session() {
    let (_h, router) = setup();

    assert_eq!(say(&router, "!skip").await, "Nothing is playing right now.");
    assert_eq!(say(&router, "!pause").await, "Nothing is playing right now.");
    assert_eq!(say(&router, "!queue").await, "Nothing is playing right now.");
    assert_eq!(say(&router, "!stop").await, "Nothing is playing.");
    assert_eq!(say(&router, "!voice").await, "Not connected to voice in this server.");
}

#[tokio::test(start_paused = true)]
async fn test_pause_resume_skip_stop() {
    let (h, router) = setup();
    h.play_and_start("song a").await;
    h.play("song b").await;

    assert_eq!(say(&router, "!pause").await, "Paused.");
    assert_eq!(say(&router, "!pause").await, "Can't pause while paused.");
    assert_eq!(say(&router, "!resume").await, "Resumed.");
    assert_eq!(say(&router, "!skip").await, "Skipped **song a**.");
    assert_eq!(say(&router, "!leave").await, "Stopped playback and cleared the queue.");
    assert!(h.reconciler.get_snapshot(GUILD).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_loop_cycles_and_validates() {
    let (h, router) = setup();
    h.play_and_start("song a").await;

    assert_eq!(say(&router, "!loop").await, "Loop mode: **track**");
    assert_eq!(say(&router, "!loop").await, "Loop mode: **queue**");
    assert_eq!(say(&router, "!loop off").await, "Loop mode: **off**");
    assert_eq!(say(&router, "!loop sideways").await, "Usage: `!loop [off|track|queue]`");
    assert_eq!(h.reconciler.get_snapshot(GUILD).unwrap().loop_mode, LoopMode::Off);
}

#[tokio::test(start_paused = true)]
async fn test_volume_command() {
    let (h, router) = setup();
    h.play_and_start("song a").await;

    assert_eq!(say(&router, "!volume").await, "Volume: 100%");
    assert_eq!(say(&router, "!vol 35%").await, "Volume set to 35%");
    assert_eq!(say(&router, "!volume loud").await, "Usage: `!volume <0-100>`");
    assert_eq!(say(&router, "!volume 250").await, "Volume must be between 0 and 100 (got 250).");
    assert_eq!(h.reconciler.get_snapshot(GUILD).unwrap().volume, 35);
}

#[tokio::test(start_paused = true)]
async fn test_voice_status() {
    let (h, router) = setup();
    h.play_and_start("song a").await;

    let reply = say(&router, "!voice").await;
    assert_eq!(
        reply,
        format!("State: playing | connected: yes | voice channel: <#{VOICE}> | retries: 0")
    );
}
