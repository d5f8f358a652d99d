use std::sync::Arc;

#[derive(Debug, thiserror::Error, Clone)]
pub enum CaptureError {
    #[error("auth error: {0}")]
    Auth(String),
    #[error("network error: {source}")]
    Network {
        #[from]
        source: Arc<reqwest::Error>,
    },
    #[error("malformed playlist: {0}")]
    MalformedPlaylist(String),
    #[error("segment fetch error: {0}")]
    SegmentFetch(String),
    #[error("pubsub error: {0}")]
    PubSub(String),
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: Arc<std::io::Error>,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

// Manual From impls because the sources are Arc-wrapped to keep the
// error Clone.
impl From<reqwest::Error> for CaptureError {
    fn from(err: reqwest::Error) -> Self {
        CaptureError::Network {
            source: Arc::new(err),
        }
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::Io {
            source: Arc::new(err),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for CaptureError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        CaptureError::PubSub(err.to_string())
    }
}
