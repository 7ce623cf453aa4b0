//! Playlist Sampler: plays the short preview clip of every track in a playlist, back to back.
//!
//! ## Pipeline
//! 1. **Fetch**: a worker downloads each preview into the on-disk cache (transient HTTP
//!    failures are retried).
//! 2. **Transcode**: a worker decodes the clip with Symphonia and writes 44.1 kHz stereo WAV.
//! 3. **Playback**: a worker plays the WAV files in arrival order via CPAL and reports elapsed
//!    time once per tick.
//!
//! Playlists are local JSON manifests. While playing, stdin accepts `p`, `s`, `l <manifest>`,
//! `i` and `q`.

mod catalogue;
mod cli;
mod config;
mod runtime;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::SamplerFileConfig;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sampler=info")),
        )
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let file_cfg = match &args.config {
        Some(path) => SamplerFileConfig::load(path)?,
        None => SamplerFileConfig::default(),
    };
    let pipeline_cfg = config::resolve(&file_cfg, &args);

    match &args.cmd {
        Some(cli::Command::Play {
            manifest,
            no_shuffle,
            paused,
        }) => {
            let opts = runtime::PlayOptions {
                manifest: manifest.clone(),
                shuffle: !no_shuffle && file_cfg.shuffle.unwrap_or(true),
                start_paused: *paused,
            };
            runtime::run_play(pipeline_cfg, opts)
        }
        None => anyhow::bail!("nothing to do; try `sampler play <manifest>` or `--list-devices`"),
    }
}
