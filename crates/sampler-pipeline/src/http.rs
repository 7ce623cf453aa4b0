//! HTTP preview source backed by `ureq`.

use std::time::Duration;

use anyhow::anyhow;
use sampler_types::TrackDescriptor;

use crate::error::FetchError;
use crate::fetch::PreviewSource;

/// Upper bound on a single preview download.
const MAX_PREVIEW_BYTES: u64 = 32 * 1024 * 1024;

/// Downloads `preview_url` with a per-request timeout.
pub struct HttpPreviewSource {
    agent: ureq::Agent,
}

impl HttpPreviewSource {
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .user_agent(concat!("playlist-sampler/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl PreviewSource for HttpPreviewSource {
    fn fetch(&self, track: &TrackDescriptor) -> Result<Vec<u8>, FetchError> {
        if !track.is_previewable() {
            return Err(anyhow!("track {} has no preview url", track.id).into());
        }
        let url = track.preview_url.trim();

        let resp = self.agent.get(url).call().map_err(|e| classify(e, url))?;
        let status = resp.status();
        if status.is_server_error() {
            return Err(FetchError::Transient(format!("{url}: status {status}")));
        }
        if !status.is_success() {
            return Err(anyhow!("preview request {url} failed with {status}").into());
        }

        resp.into_body()
            .with_config()
            .limit(MAX_PREVIEW_BYTES)
            .read_to_vec()
            .map_err(|e| classify(e, url))
    }
}

fn classify(err: ureq::Error, url: &str) -> FetchError {
    if is_transient(&err) {
        FetchError::Transient(format!("{url}: {err}"))
    } else {
        FetchError::Fatal(anyhow!("preview request {url} failed: {err}"))
    }
}

/// Network and TLS level failures are worth another attempt; everything else is not.
pub fn is_transient(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::Io(_)
        | ureq::Error::Timeout(_)
        | ureq::Error::HostNotFound
        | ureq::Error::ConnectionFailed
        | ureq::Error::Tls(_) => true,
        ureq::Error::StatusCode(code) => *code >= 500,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_level_errors_are_transient() {
        assert!(is_transient(&ureq::Error::ConnectionFailed));
        assert!(is_transient(&ureq::Error::HostNotFound));
        assert!(is_transient(&ureq::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset"
        ))));
    }

    #[test]
    fn client_errors_are_fatal() {
        assert!(!is_transient(&ureq::Error::StatusCode(404)));
        assert!(!is_transient(&ureq::Error::BadUri("nope".to_string())));
        assert!(is_transient(&ureq::Error::StatusCode(503)));
    }

    #[test]
    fn missing_preview_url_is_fatal_without_a_request() {
        let source = HttpPreviewSource::new(Duration::from_secs(1));
        let track = TrackDescriptor {
            id: "x".to_string(),
            name: "x".to_string(),
            preview_url: String::new(),
            artists: Vec::new(),
            album: None,
        };
        assert!(matches!(source.fetch(&track), Err(FetchError::Fatal(_))));
    }
}
