//! AppState construction extracted from `main.rs`.

use std::sync::Arc;

use anyhow::Context;

use leitl_contextsync::WebDavSource;
use leitl_domain::config::{Config, ConfigSeverity};
use leitl_store::MemoryStore;

use crate::coordinator::Coordinator;
use crate::state::AppState;

/// Validate config, build and initialize the coordinator and return a
/// fully-wired [`AppState`].  Background tasks are running on return.
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    for issue in config.validate() {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if config.has_errors() {
        anyhow::bail!("config validation failed, see the errors above");
    }

    // ── Shared store ─────────────────────────────────────────────────
    let store = Arc::new(MemoryStore::new());
    tracing::info!(
        key_prefix = %config.store.key_prefix,
        channel = %config.store.channel,
        timeout_ms = config.store.timeout_ms,
        "shared store ready (in-process)"
    );

    // ── Remote document source ───────────────────────────────────────
    let source = Arc::new(
        WebDavSource::new(&config.context).context("creating WebDAV client")?,
    );

    // ── Coordinator ──────────────────────────────────────────────────
    let coordinator = Arc::new(Coordinator::new(config.clone(), store, source));
    coordinator
        .initialize()
        .await
        .context("initializing coordinator")?;

    Ok(AppState::new(coordinator))
}
