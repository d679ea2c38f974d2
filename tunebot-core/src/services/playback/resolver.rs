// File: tunebot-core/src/services/playback/resolver.rs
//
// Turns a user query (free text or URL) into one playable track, retrying
// the engine's search with progressively looser queries.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use tunebot_common::models::TrackMetadata;
use tunebot_common::traits::PlaybackEngine;
use tunebot_common::{EngineError, PlaybackError};

const URL_HOSTS: [&str; 4] = ["youtube.com", "youtu.be", "spotify.com", "soundcloud.com"];

/// True when the query should be treated as a link rather than search text.
pub fn is_url(query: &str) -> bool {
    let q = query.trim();
    q.starts_with("http") || URL_HOSTS.iter().any(|host| q.contains(host))
}

/// Strips tracking noise from YouTube links: watch URLs keep only `v`,
/// short links lose their query entirely. Anything else passes through.
pub fn clean_youtube_url(query: &str) -> String {
    let Ok(mut url) = Url::parse(query.trim()) else {
        return query.to_string();
    };
    let host = url
        .host_str()
        .unwrap_or_default()
        .trim_start_matches("www.")
        .trim_start_matches("m.")
        .to_string();

    match host.as_str() {
        "youtube.com" | "music.youtube.com" if url.path() == "/watch" => {
            let video = url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned());
            let Some(video) = video else {
                return query.to_string();
            };
            url.set_query(None);
            url.query_pairs_mut().append_pair("v", &video);
        }
        "youtu.be" => url.set_query(None),
        _ => return query.to_string(),
    }
    url.set_fragment(None);
    url.to_string()
}

/// Drops everything after `?`, except on watch URLs where the query *is* the
/// video id.
fn strip_query(query: &str) -> String {
    if query.contains("/watch?") {
        return query.to_string();
    }
    query.split('?').next().unwrap_or(query).to_string()
}

/// The query to use after attempt number `attempt` (1-based) came up empty.
pub fn fallback_query(attempt: u32, original: &str, current: &str) -> String {
    let url = is_url(original);
    match attempt {
        1 if url => strip_query(current),
        2 if !url => format!("{original} official"),
        _ => current.to_string(),
    }
}

#[derive(Clone)]
pub struct QueryResolver {
    engine: Arc<dyn PlaybackEngine>,
    attempts: u32,
    retry_delay: Duration,
}

impl QueryResolver {
    pub fn new(engine: Arc<dyn PlaybackEngine>, attempts: u32, retry_delay: Duration) -> Self {
        Self {
            engine,
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    /// Returns the best candidate for `query`, or `NotFound` carrying the
    /// query as the user typed it.
    pub async fn resolve(&self, query: &str) -> Result<TrackMetadata, PlaybackError> {
        let original = query.trim();
        if original.is_empty() {
            return Err(PlaybackError::NotFound(String::new()));
        }

        let mut current = if is_url(original) {
            clean_youtube_url(original)
        } else {
            original.to_string()
        };

        for attempt in 1..=self.attempts {
            debug!(attempt, query = %current, "searching");
            match self.engine.search(&current).await {
                Ok(hits) => {
                    if let Some(first) = hits.into_iter().next() {
                        info!(attempt, query = %current, title = %first.title, "query resolved");
                        return Ok(first);
                    }
                    debug!(attempt, query = %current, "search returned nothing");
                }
                Err(EngineError::NotFound(_)) => debug!(attempt, query = %current, "search returned nothing"),
                Err(e) => warn!(attempt, query = %current, error = %e, "search failed"),
            }

            if attempt < self.attempts {
                current = fallback_query(attempt, original, &current);
                sleep(self.retry_delay).await;
            }
        }

        Err(PlaybackError::NotFound(original.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tunebot_common::models::{ChannelId, GuildId, PlayToken, QueueItem};

    /// Answers only the queries it was told about, and remembers every query.
    struct SearchOnly {
        known: Vec<(String, &'static str)>,
        seen: Mutex<Vec<String>>,
    }

    impl SearchOnly {
        fn new(known: &[(&str, &'static str)]) -> Arc<Self> {
            Arc::new(Self {
                known: known.iter().map(|(q, t)| (q.to_string(), *t)).collect(),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlaybackEngine for SearchOnly {
        async fn search(&self, query: &str) -> Result<Vec<TrackMetadata>, EngineError> {
            self.seen.lock().unwrap().push(query.to_string());
            self.known
                .iter()
                .find(|(q, _)| q == query)
                .map(|(q, title)| {
                    vec![TrackMetadata {
                        title: title.to_string(),
                        author: "someone".into(),
                        duration_seconds: Some(200),
                        source_url: q.clone(),
                    }]
                })
                .ok_or_else(|| EngineError::NotFound(query.to_string()))
        }
        async fn connect(&self, _: GuildId, _: ChannelId) -> Result<(), EngineError> {
            Ok(())
        }
        async fn play(&self, _: GuildId, _: &QueueItem, _: PlayToken) -> Result<(), EngineError> {
            Ok(())
        }
        async fn stop_current(&self, _: GuildId) -> Result<(), EngineError> {
            Ok(())
        }
        async fn pause(&self, _: GuildId) -> Result<(), EngineError> {
            Ok(())
        }
        async fn resume(&self, _: GuildId) -> Result<(), EngineError> {
            Ok(())
        }
        async fn set_volume(&self, _: GuildId, _: u8) -> Result<(), EngineError> {
            Ok(())
        }
        async fn disconnect(&self, _: GuildId) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/a.mp3"));
        assert!(is_url("youtu.be/abc"));
        assert!(is_url("open.spotify.com/track/1"));
        assert!(!is_url("never gonna give you up"));
    }

    #[test]
    fn test_clean_watch_url_keeps_only_video_id() {
        let cleaned = clean_youtube_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL123&t=42#x");
        assert_eq!(cleaned, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn test_clean_short_url_drops_query() {
        let cleaned = clean_youtube_url("https://youtu.be/dQw4w9WgXcQ?si=tracking");
        assert_eq!(cleaned, "https://youtu.be/dQw4w9WgXcQ");
    }

    #[test]
    fn test_clean_leaves_other_input_alone() {
        assert_eq!(clean_youtube_url("lofi beats"), "lofi beats");
        assert_eq!(
            clean_youtube_url("https://soundcloud.com/a/b?in=x"),
            "https://soundcloud.com/a/b?in=x"
        );
    }

    #[test]
    fn test_fallback_queries() {
        assert_eq!(
            fallback_query(1, "https://soundcloud.com/a/b?in=x", "https://soundcloud.com/a/b?in=x"),
            "https://soundcloud.com/a/b"
        );
        assert_eq!(fallback_query(1, "some song", "some song"), "some song");
        assert_eq!(fallback_query(2, "some song", "some song"), "some song official");
        assert_eq!(fallback_query(2, "https://youtu.be/x", "https://youtu.be/x"), "https://youtu.be/x");
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_hit_wins() {
        let engine = SearchOnly::new(&[("some song", "Some Song")]);
        let resolver = QueryResolver::new(engine.clone(), 3, Duration::from_secs(1));
        let track = resolver.resolve("  some song ").await.unwrap();
        assert_eq!(track.title, "Some Song");
        assert_eq!(engine.seen(), vec!["some song".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_attempt_appends_official() {
        let engine = SearchOnly::new(&[("obscure tune official", "Obscure Tune")]);
        let resolver = QueryResolver::new(engine.clone(), 3, Duration::from_secs(1));
        let track = resolver.resolve("obscure tune").await.unwrap();
        assert_eq!(track.title, "Obscure Tune");
        assert_eq!(
            engine.seen(),
            vec!["obscure tune", "obscure tune", "obscure tune official"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_after_all_attempts() {
        let engine = SearchOnly::new(&[]);
        let resolver = QueryResolver::new(engine.clone(), 3, Duration::from_secs(1));
        let err = resolver.resolve("nothing matches").await.unwrap_err();
        assert_eq!(err, PlaybackError::NotFound("nothing matches".into()));
        assert_eq!(engine.seen().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_query_is_not_searched() {
        let engine = SearchOnly::new(&[]);
        let resolver = QueryResolver::new(engine.clone(), 3, Duration::from_millis(1));
        assert!(resolver.resolve("   ").await.is_err());
        assert!(engine.seen().is_empty());
    }
}
