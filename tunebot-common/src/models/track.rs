use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A search hit as reported by the playback engine, before it is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: String,
    pub author: String,
    pub duration_seconds: Option<u64>,
    pub source_url: String,
}

/// One playable unit in a guild's queue.
///
/// Items are immutable once enqueued. Loop modes re-insert the same shared
/// item rather than resolving the query again, so `id` is stable across
/// repetitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub duration_seconds: Option<u64>,
    pub source_url: String,
    pub requested_by: String,
}

impl QueueItem {
    pub fn from_metadata(metadata: TrackMetadata, requested_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: metadata.title,
            author: metadata.author,
            duration_seconds: metadata.duration_seconds,
            source_url: metadata.source_url,
            requested_by: requested_by.into(),
        }
    }

    /// `m:ss` (or `h:mm:ss`) rendering of the duration, `live` when unknown.
    pub fn duration_label(&self) -> String {
        match self.duration_seconds {
            Some(total) => {
                let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
                if h > 0 {
                    format!("{h}:{m:02}:{s:02}")
                } else {
                    format!("{m}:{s:02}")
                }
            }
            None => "live".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(duration: Option<u64>) -> TrackMetadata {
        TrackMetadata {
            title: "Song".into(),
            author: "Artist".into(),
            duration_seconds: duration,
            source_url: "https://example.com/song".into(),
        }
    }

    #[test]
    fn test_from_metadata_assigns_fresh_identity() {
        let a = QueueItem::from_metadata(meta(Some(10)), "alice");
        let b = QueueItem::from_metadata(meta(Some(10)), "alice");
        assert_ne!(a.id, b.id);
        assert_eq!(a.requested_by, "alice");
    }

    #[test]
    fn test_duration_label() {
        assert_eq!(QueueItem::from_metadata(meta(Some(65)), "x").duration_label(), "1:05");
        assert_eq!(QueueItem::from_metadata(meta(Some(3725)), "x").duration_label(), "1:02:05");
        assert_eq!(QueueItem::from_metadata(meta(None), "x").duration_label(), "live");
    }
}
