//! Configuration loading and resolution.
//!
//! An optional TOML file supplies defaults; CLI flags win over it; anything left unset falls
//! back to [`PipelineConfig::default`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sampler_pipeline::config::PipelineConfig;
use serde::Deserialize;

use crate::cli::Args;

/// Config file schema. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct SamplerFileConfig {
    /// Directory for downloaded preview clips.
    pub cache_dir: Option<PathBuf>,
    /// Directory for transcoded PCM files.
    pub temp_dir: Option<PathBuf>,
    /// Output device substring.
    pub device: Option<String>,
    /// Elapsed-time report interval in milliseconds (default: 1000).
    pub tick_ms: Option<u64>,
    /// Per-request download timeout in seconds (default: 15).
    pub fetch_timeout_secs: Option<u64>,
    /// Unload wait threshold in seconds (default: 30).
    pub wait_threshold_secs: Option<u64>,
    /// Resampler chunk size in frames.
    pub chunk_frames: Option<usize>,
    /// Cap on the output stream buffer in frames.
    pub max_buffer_frames: Option<u32>,
    /// Shuffle playlists on load (default: true).
    pub shuffle: Option<bool>,
}

impl SamplerFileConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<SamplerFileConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Merge defaults, the config file and CLI flags into the pipeline settings.
pub fn resolve(file: &SamplerFileConfig, args: &Args) -> PipelineConfig {
    let defaults = PipelineConfig::default();
    PipelineConfig {
        cache_dir: args
            .cache_dir
            .clone()
            .or_else(|| file.cache_dir.clone())
            .unwrap_or(defaults.cache_dir),
        temp_dir: args
            .temp_dir
            .clone()
            .or_else(|| file.temp_dir.clone())
            .unwrap_or(defaults.temp_dir),
        tick_interval: file
            .tick_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.tick_interval),
        fetch_timeout: args
            .fetch_timeout_secs
            .or(file.fetch_timeout_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.fetch_timeout),
        wait_threshold_secs: args
            .wait_threshold_secs
            .or(file.wait_threshold_secs)
            .unwrap_or(defaults.wait_threshold_secs),
        device: normalize_device_name(args.device.clone().or_else(|| file.device.clone())),
        chunk_frames: args
            .chunk_frames
            .or(file.chunk_frames)
            .unwrap_or(defaults.chunk_frames)
            .max(1),
        max_buffer_frames: file
            .max_buffer_frames
            .unwrap_or(defaults.max_buffer_frames),
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
