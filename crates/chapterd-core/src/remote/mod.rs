//! Remote content API used for chapter discovery.
//!
//! Two calls: a cheap aggregate chapter count (the checker) and the full
//! per-chapter listing (the executor, to know what to download and which
//! group each chapter belongs to).

mod http;
mod parse;

pub use http::MangaDexClient;
pub use parse::{parse_aggregate_count, parse_feed_page, title_id_from_url, FeedPage};

use async_trait::async_trait;

use crate::retry::{classify_curl_error, classify_http_status, ErrorKind, FailureKind};

/// One chapter as listed by the remote API.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteChapter {
    pub id: String,
    /// Raw number as listed; `None` for unnumbered oneshots.
    pub number: Option<String>,
    pub volume: Option<String>,
    pub language: String,
    pub title: Option<String>,
    /// Scanlation group name, if any.
    pub group: Option<String>,
    /// Canonical chapter URL handed to the download tool.
    pub url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("unsupported source URL {0:?} (expected .../title/<id>)")]
    UnsupportedUrl(String),
    #[error("request failed: {0}")]
    Curl(#[from] curl::Error),
    #[error("HTTP {status} from {url}")]
    Http { status: u32, url: String },
    #[error("unexpected response from {url}: {reason}")]
    Parse { url: String, reason: String },
    #[error("request task failed: {0}")]
    Task(String),
}

impl RemoteError {
    /// Per-request retry classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemoteError::Curl(e) => classify_curl_error(e),
            RemoteError::Http { status, .. } => classify_http_status(*status),
            RemoteError::UnsupportedUrl(_) | RemoteError::Parse { .. } | RemoteError::Task(_) => {
                ErrorKind::Other
            }
        }
    }

    /// Job-level classification: a missing title or bad URL will not fix itself.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            RemoteError::UnsupportedUrl(_) => FailureKind::Permanent,
            RemoteError::Http { status, .. } => classify_http_status(*status).failure_kind(),
            _ => FailureKind::Transient,
        }
    }
}

#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Number of distinct chapter numbers available for the title in `language`.
    async fn aggregate_count(&self, source_url: &str, language: &str) -> Result<i64, RemoteError>;

    /// Every chapter of the title in `language`, in ascending chapter order.
    async fn list_chapters(
        &self,
        source_url: &str,
        language: &str,
    ) -> Result<Vec<RemoteChapter>, RemoteError>;
}
