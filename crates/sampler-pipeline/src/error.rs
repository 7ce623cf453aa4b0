//! Error taxonomy for the sampling pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by stage workers and control calls.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A payload handed to the playback queue was not a PCM (WAV) file.
    #[error("invalid submission {path:?}: expected a .wav file")]
    InvalidSubmission { path: PathBuf },

    /// `on_finished` was called after a callback had already been registered.
    #[error("a finish callback is already registered")]
    FinishCallbackAlreadySet,

    /// `start` was called twice on the same stage.
    #[error("{stage} stage already started")]
    AlreadyStarted { stage: &'static str },

    /// A non-transient fetch failure ended the fetch stage.
    #[error("fetch of track {track_id} failed: {source}")]
    Fetch {
        track_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// Filesystem failure inside a stage worker.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The stage worker thread panicked.
    #[error("{stage} worker panicked")]
    WorkerPanicked { stage: &'static str },
}

impl PipelineError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Outcome classification for a single preview download.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network or TLS level failure; the track is queued again.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// Anything else; ends the fetch stage.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

/// A codec conversion that cannot succeed for this input.
#[derive(Debug, Error)]
#[error("transcode of {input:?} failed: {source}")]
pub struct TranscodeError {
    pub input: PathBuf,
    #[source]
    pub source: anyhow::Error,
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
