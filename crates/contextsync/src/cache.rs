//! TTL cache in front of a [`DocumentSource`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use leitl_domain::config::ContextConfig;
use leitl_domain::trace::TraceEvent;

use crate::ranker::{RelevanceRanker, NEUTRAL_RELEVANCE};
use crate::{
    ContextSyncRequest, ContextSyncResult, Credentials, DocumentSource, MatchedFile, RemoteEntry,
    SyncError,
};

/// Cache key for a sync: hex SHA-256 of
/// `source_url|query-or-"all"|sorted,normalized filters`.
///
/// Filters are lower-cased with any leading dot removed, so `".MD"` and
/// `"md"` share an entry.  `max_results` is not part of the key.
pub fn cache_key(source_url: &str, query: Option<&str>, filters: &[String]) -> String {
    let mut normalized: Vec<String> = filters.iter().filter_map(|f| normalize_filter(f)).collect();
    normalized.sort();
    normalized.dedup();

    let query = query.map(str::trim).filter(|q| !q.is_empty()).unwrap_or("all");
    let raw = format!("{source_url}|{query}|{}", normalized.join(","));
    hex::encode(Sha256::digest(raw.as_bytes()))
}

fn normalize_filter(f: &str) -> Option<String> {
    let f = f.trim().trim_start_matches('.').to_ascii_lowercase();
    (!f.is_empty()).then_some(f)
}

struct CachedSync {
    result: ContextSyncResult,
    stored_at: Instant,
}

pub struct ContextCache {
    source: Arc<dyn DocumentSource>,
    ranker: RelevanceRanker,
    entries: RwLock<HashMap<String, CachedSync>>,
    ttl: Duration,
    request_timeout: Duration,
    max_concurrent_fetches: usize,
    max_results_cap: usize,
    default_max_results: usize,
}

impl ContextCache {
    pub fn new(source: Arc<dyn DocumentSource>, cfg: &ContextConfig) -> Self {
        Self {
            source,
            ranker: RelevanceRanker::new(),
            entries: RwLock::new(HashMap::new()),
            ttl: cfg.cache_ttl(),
            request_timeout: cfg.request_timeout(),
            max_concurrent_fetches: cfg.max_concurrent_fetches.max(1),
            max_results_cap: cfg.max_results_cap.max(1),
            default_max_results: cfg.default_max_results,
        }
    }

    /// Return the ranked files for `req`, from cache when a fresh entry
    /// exists.  Never fails: listing errors come back in `error`.
    pub async fn sync_and_get(&self, req: &ContextSyncRequest) -> ContextSyncResult {
        let started = StdInstant::now();
        let query = req.effective_query();
        let key = cache_key(&req.source_url, query, &req.file_type_filters);

        if let Some(hit) = self.lookup(&key) {
            TraceEvent::ContextSynced {
                source_url: req.source_url.clone(),
                cache_hit: true,
                total_matches: hit.total_matches,
                fetch_failures: 0,
                duration_ms: started.elapsed().as_millis() as u64,
            }
            .emit();
            return hit;
        }

        let listing = match tokio::time::timeout(
            self.request_timeout,
            self.source.list(&req.source_url, req.credentials.as_ref()),
        )
        .await
        {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => return self.failure(req, query, e),
            Err(_) => {
                let e = SyncError::Timeout(format!(
                    "listing exceeded {}ms",
                    self.request_timeout.as_millis()
                ));
                return self.failure(req, query, e);
            }
        };

        let limit = req
            .max_results
            .unwrap_or(self.default_max_results)
            .min(self.max_results_cap);
        let selected = select(listing, &req.file_type_filters, query, limit);

        let credentials = req.credentials.as_ref();
        let fetched: Vec<(RemoteEntry, Result<String, SyncError>)> = stream::iter(selected)
            .map(|entry| async move {
                let content = self.fetch_one(&entry, credentials).await;
                (entry, content)
            })
            .buffered(self.max_concurrent_fetches)
            .collect()
            .await;

        let mut fetch_failures = 0;
        let mut matched_files: Vec<MatchedFile> = fetched
            .into_iter()
            .map(|(entry, content)| {
                let (content, relevance) = match content {
                    Ok(text) => {
                        let score = self.ranker.score(&text, query);
                        (text, score)
                    }
                    Err(e) => {
                        fetch_failures += 1;
                        tracing::warn!(file = %entry.url, error = %e, "context fetch failed");
                        // Placeholders never outrank real documents.
                        let score = if query.is_some() { 0.0 } else { NEUTRAL_RELEVANCE };
                        (format!("[error fetching content: {e}]"), score)
                    }
                };
                MatchedFile {
                    name: entry.name,
                    path: entry.path,
                    url: entry.url,
                    size_bytes: entry.size_bytes,
                    content_type: entry.content_type,
                    last_modified: entry.last_modified,
                    content,
                    relevance,
                }
            })
            .collect();

        // sort_by is stable: equal scores keep listing order.
        matched_files.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));

        let result = ContextSyncResult {
            source_url: req.source_url.clone(),
            query: query.map(str::to_owned),
            total_matches: matched_files.len(),
            matched_files,
            synced_at: Utc::now(),
            cached: false,
            error: None,
        };
        self.store(key, result.clone());

        TraceEvent::ContextSynced {
            source_url: req.source_url.clone(),
            cache_hit: false,
            total_matches: result.total_matches,
            fetch_failures,
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();

        result
    }

    /// Drop every entry older than the TTL.  Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, c| now.duration_since(c.stored_at) < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn lookup(&self, key: &str) -> Option<ContextSyncResult> {
        let entries = self.entries.read();
        let cached = entries.get(key)?;
        if cached.stored_at.elapsed() >= self.ttl {
            return None;
        }
        let mut result = cached.result.clone();
        result.cached = true;
        Some(result)
    }

    fn store(&self, key: String, result: ContextSyncResult) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.retain(|_, c| now.duration_since(c.stored_at) < self.ttl);
        entries.insert(
            key,
            CachedSync {
                result,
                stored_at: now,
            },
        );
    }

    async fn fetch_one(
        &self,
        entry: &RemoteEntry,
        credentials: Option<&Credentials>,
    ) -> Result<String, SyncError> {
        match tokio::time::timeout(self.request_timeout, self.source.fetch(entry, credentials)).await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(format!(
                "fetch exceeded {}ms",
                self.request_timeout.as_millis()
            ))),
        }
    }

    fn failure(
        &self,
        req: &ContextSyncRequest,
        query: Option<&str>,
        error: SyncError,
    ) -> ContextSyncResult {
        if leitl_domain::Error::from(error.clone()).is_transient() {
            tracing::warn!(source = %req.source_url, error = %error, "context listing failed");
        } else {
            tracing::info!(source = %req.source_url, error = %error, "context listing rejected");
        }
        ContextSyncResult::failed(&req.source_url, query, &error)
    }
}

/// Apply extension filters, then the name filter, then the result cap.
fn select(
    listing: Vec<RemoteEntry>,
    filters: &[String],
    query: Option<&str>,
    limit: usize,
) -> Vec<RemoteEntry> {
    let filters: Vec<String> = filters.iter().filter_map(|f| normalize_filter(f)).collect();
    let needle = query.map(str::to_lowercase);

    listing
        .into_iter()
        .filter(|e| {
            filters.is_empty()
                || e.extension()
                    .is_some_and(|ext| filters.iter().any(|f| *f == ext))
        })
        .filter(|e| match &needle {
            Some(n) => e.name.to_lowercase().contains(n.as_str()),
            None => true,
        })
        .take(limit)
        .collect()
}
