use std::sync::{Arc, Mutex};

use sampler_types::{PlaybackState, PlayerEvent, SessionSnapshot, TrackDescriptor};

/// Presentation-side view of a session, folded from [`PlayerEvent`]s.
#[derive(Debug, Default)]
pub struct SessionStatus {
    /// Track currently handed to the output.
    pub now_playing: Option<TrackDescriptor>,
    /// 1-based number of the current track; `0` before the first track starts.
    pub track_number: usize,
    /// Number of previewable tracks in the playlist.
    pub playlist_total: usize,
    /// Last reported elapsed seconds.
    pub elapsed_secs: u64,
    /// Every track that started, oldest first.
    pub played: Vec<TrackDescriptor>,
    /// Engine state as last set by the controller.
    pub state: PlaybackState,
    /// First stage failure, as `"<stage>: <error>"`.
    pub fault: Option<String>,
}

impl SessionStatus {
    /// Create a shared, mutex-protected status store.
    pub fn shared(playlist_total: usize) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            playlist_total,
            ..Self::default()
        }))
    }

    /// Fold one engine notification into the view.
    pub fn apply(&mut self, event: &PlayerEvent) {
        match event {
            PlayerEvent::Elapsed { seconds } => self.elapsed_secs = *seconds,
            PlayerEvent::TrackStarted { track } => {
                self.track_number += 1;
                self.elapsed_secs = 0;
                self.now_playing = Some(track.clone());
                self.played.push(track.clone());
            }
            PlayerEvent::Finished => {
                self.now_playing = None;
                self.state = PlaybackState::Stopped;
            }
            PlayerEvent::StageFailed { stage, error } => {
                self.fault.get_or_insert_with(|| format!("{stage}: {error}"));
            }
        }
    }

    pub fn set_state(&mut self, state: PlaybackState) {
        self.state = state;
    }

    /// Start over for a new playlist.
    pub fn reset(&mut self, playlist_total: usize) {
        *self = Self {
            playlist_total,
            ..Self::default()
        };
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            now_playing: self.now_playing.clone(),
            track_number: self.track_number,
            playlist_total: self.playlist_total,
            elapsed_secs: self.elapsed_secs,
            played: self.played.clone(),
            state: self.state,
            fault: self.fault.clone(),
        }
    }
}
