use thiserror::Error;

/// Failure before an `ApiEnvelope` could be produced. Application-level
/// rejections are not errors here; they arrive as `success: false` inside the
/// envelope and are handled by the caller.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid response body from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
}
