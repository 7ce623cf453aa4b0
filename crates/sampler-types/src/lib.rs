use serde::{Deserialize, Serialize};

/// Identity and display metadata for one previewable track.
///
/// Supplied by the catalogue and never mutated by the pipeline.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TrackDescriptor {
    /// Catalogue id; also the key of the preview cache.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Remote locator of the preview clip. Empty when the catalogue has no preview.
    #[serde(default)]
    pub preview_url: String,
    /// Artist names, in catalogue order.
    #[serde(default)]
    pub artists: Vec<String>,
    /// Album name, if known.
    #[serde(default)]
    pub album: Option<String>,
}

impl TrackDescriptor {
    /// `true` when the track has a preview clip that can be sampled.
    pub fn is_previewable(&self) -> bool {
        !self.preview_url.trim().is_empty()
    }

    /// "Artist A, Artist B - Name", or just the name when no artists are known.
    pub fn display_name(&self) -> String {
        if self.artists.is_empty() {
            self.name.clone()
        } else {
            format!("{} - {}", self.artists.join(", "), self.name)
        }
    }
}

/// Lifecycle of the playback engine.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Initial state; the engine waits for `play()`.
    #[default]
    Paused,
    /// Items are taken from the queue and played back to back.
    Playing,
    /// Terminal; the worker has exited or is about to.
    Stopped,
}

/// Notifications emitted by the playback engine, its progress timer and the pipeline stages.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlayerEvent {
    /// Elapsed seconds within the current item. `0` marks a reset.
    Elapsed { seconds: u64 },
    /// A new item is about to be handed to the audio output.
    TrackStarted { track: TrackDescriptor },
    /// The engine worker exited after `stop()`.
    Finished,
    /// A fetch or transcode worker ended with a fatal error. Items already queued for
    /// playback keep playing.
    StageFailed { stage: String, error: String },
}

/// Session-level view for presentation layers.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Track currently handed to the output, if any.
    pub now_playing: Option<TrackDescriptor>,
    /// 1-based number of the current track within the session.
    pub track_number: usize,
    /// Number of previewable tracks in the playlist.
    pub playlist_total: usize,
    /// Elapsed seconds in the current track.
    pub elapsed_secs: u64,
    /// Every track that started playing, oldest first.
    pub played: Vec<TrackDescriptor>,
    /// Engine state as last observed.
    pub state: PlaybackState,
    /// First stage failure reported in this session.
    #[serde(default)]
    pub fault: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(artists: &[&str]) -> TrackDescriptor {
        TrackDescriptor {
            id: "abc".to_string(),
            name: "Song".to_string(),
            preview_url: "https://example/p.mp3".to_string(),
            artists: artists.iter().map(|a| a.to_string()).collect(),
            album: None,
        }
    }

    #[test]
    fn display_name_joins_artists() {
        assert_eq!(track(&[]).display_name(), "Song");
        assert_eq!(track(&["A", "B"]).display_name(), "A, B - Song");
    }

    #[test]
    fn blank_preview_url_is_not_previewable() {
        let mut t = track(&[]);
        assert!(t.is_previewable());
        t.preview_url = "  ".to_string();
        assert!(!t.is_previewable());
    }

    #[test]
    fn track_descriptor_defaults_optional_fields() {
        let t: TrackDescriptor =
            serde_json::from_str(r#"{"id":"1","name":"x"}"#).expect("parse track");
        assert!(t.artists.is_empty());
        assert!(t.album.is_none());
        assert!(!t.is_previewable());
    }

    #[test]
    fn player_event_is_tagged() {
        let json = serde_json::to_string(&PlayerEvent::Elapsed { seconds: 3 }).unwrap();
        assert_eq!(json, r#"{"kind":"elapsed","seconds":3}"#);
        let json = serde_json::to_string(&PlayerEvent::Finished).unwrap();
        assert_eq!(json, r#"{"kind":"finished"}"#);
        let json = serde_json::to_string(&PlayerEvent::StageFailed {
            stage: "fetch".to_string(),
            error: "HTTP 404".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"kind":"stage_failed","stage":"fetch","error":"HTTP 404"}"#);
    }
}
