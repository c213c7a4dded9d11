//! Remote-document context sync.
//!
//! A [`DocumentSource`] lists and fetches files from a directory-style
//! remote (WebDAV in production, see [`webdav::WebDavSource`]).
//! [`ContextCache`] filters and ranks those files against a query with
//! [`RelevanceRanker`] and keeps each result for a fixed TTL.

pub mod cache;
pub mod ranker;
pub mod webdav;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use cache::{cache_key, ContextCache};
pub use ranker::RelevanceRanker;
pub use webdav::WebDavSource;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("authentication failed ({0})")]
    Auth(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("transport: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
}

impl From<SyncError> for leitl_domain::Error {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Auth(_) => leitl_domain::Error::Auth(e.to_string()),
            SyncError::Timeout(_) => leitl_domain::Error::Timeout(e.to_string()),
            other => leitl_domain::Error::Http(other.to_string()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Basic-auth credentials for the remote source.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// One file reported by a directory listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub path: String,
    /// Absolute URL the content can be fetched from.
    pub url: String,
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    /// Lower-cased extension without the dot, if the name has one.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// A ranked file in a sync result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedFile {
    pub name: String,
    pub path: String,
    pub url: String,
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    /// File body, or `"[error fetching content: <reason>]"` when the fetch failed.
    pub content: String,
    pub relevance: f64,
}

/// Parameters of one sync call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextSyncRequest {
    pub source_url: String,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub file_type_filters: Vec<String>,
    #[serde(default)]
    pub max_results: Option<usize>,
}

impl ContextSyncRequest {
    /// The query if it has any non-whitespace content.
    pub fn effective_query(&self) -> Option<&str> {
        self.query.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }
}

/// Outcome of a sync.  Listing failures are reported through `error`
/// with an empty file list instead of failing the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSyncResult {
    pub source_url: String,
    pub query: Option<String>,
    pub matched_files: Vec<MatchedFile>,
    pub total_matches: usize,
    pub synced_at: DateTime<Utc>,
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ContextSyncResult {
    pub fn failed(source_url: &str, query: Option<&str>, error: &SyncError) -> Self {
        Self {
            source_url: source_url.to_owned(),
            query: query.map(str::to_owned),
            matched_files: Vec::new(),
            total_matches: 0,
            synced_at: Utc::now(),
            cached: false,
            error: Some(error.to_string()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DocumentSource
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A directory-style remote holding documents.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// List the files directly under `source_url`.  Directories are not
    /// returned.
    async fn list(
        &self,
        source_url: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Vec<RemoteEntry>, SyncError>;

    /// Download one file's content as text.
    async fn fetch(
        &self,
        entry: &RemoteEntry,
        credentials: Option<&Credentials>,
    ) -> Result<String, SyncError>;
}
