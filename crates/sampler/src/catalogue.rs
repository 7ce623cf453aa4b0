//! Playlist manifests: a local JSON stand-in for the remote catalogue.

use std::path::Path;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use sampler_types::TrackDescriptor;
use serde::Deserialize;

/// `{ "name": ..., "tracks": [ ... ] }`
#[derive(Clone, Debug, Deserialize)]
pub struct Playlist {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tracks: Vec<TrackDescriptor>,
}

impl Playlist {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read playlist {:?}", path))?;
        let mut playlist: Playlist =
            serde_json::from_str(&raw).with_context(|| format!("parse playlist {:?}", path))?;
        if playlist.name.is_empty() {
            playlist.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        Ok(playlist)
    }

    /// Tracks that have a preview clip, optionally shuffled.
    pub fn into_previewable(self, shuffle: bool) -> Vec<TrackDescriptor> {
        let mut tracks: Vec<TrackDescriptor> = self
            .tracks
            .into_iter()
            .filter(TrackDescriptor::is_previewable)
            .collect();
        if shuffle {
            tracks.shuffle(&mut rand::thread_rng());
        }
        tracks
    }
}
