//! Background reaper for sessions that stopped heartbeating.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use leitl_contextsync::ContextCache;
use leitl_domain::trace::TraceEvent;
use leitl_domain::Result;
use leitl_store::SharedStore;

use super::sessions::{EndOutcome, SessionRegistry};

pub const EXPIRED_REASON: &str = "heartbeat_timeout";

pub struct HeartbeatSweeper {
    registry: Arc<SessionRegistry>,
    context: Option<Arc<ContextCache>>,
    store: Option<Arc<dyn SharedStore>>,
    interval: Duration,
    /// Seconds of silence after which a session is ended.
    timeout_secs: i64,
}

impl HeartbeatSweeper {
    pub fn new(registry: Arc<SessionRegistry>, interval: Duration, timeout: Duration) -> Self {
        Self {
            registry,
            context: None,
            store: None,
            interval,
            timeout_secs: i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
        }
    }

    /// Also purge expired context-cache entries on every tick.
    pub fn with_context_cache(mut self, cache: Arc<ContextCache>) -> Self {
        self.context = Some(cache);
        self
    }

    /// Also reclaim expired store keys (tombstones, lapsed records) on
    /// every tick.
    pub fn with_store(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// End every session whose last heartbeat is older than the timeout as
    /// of `now`.  Sessions ended concurrently by someone else are skipped.
    /// Returns how many this pass ended.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let started = Instant::now();
        let sessions = self.registry.active_sessions().await?;
        let scanned = sessions.len();

        let mut expired = 0;
        for session in sessions {
            if session.idle_secs(now) <= self.timeout_secs {
                continue;
            }
            match self.registry.end(&session.session_id, EXPIRED_REASON).await {
                Ok(EndOutcome::Ended { .. }) => {
                    tracing::info!(session_id = %session.session_id, agent = %session.agent_name, "session expired");
                    expired += 1;
                }
                Ok(EndOutcome::AlreadyEnded) => {}
                Err(e) => {
                    tracing::warn!(session_id = %session.session_id, error = %e, "failed to end expired session");
                }
            }
        }

        TraceEvent::SweepCompleted {
            scanned,
            expired,
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
        Ok(expired)
    }

    /// One tick: sweep, then housekeeping.
    async fn tick(&self) {
        if let Err(e) = self.sweep_expired(Utc::now()).await {
            tracing::warn!(error = %e, "session sweep failed");
        }
        self.registry.prune_locks();
        if let Some(store) = &self.store {
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "reclaimed expired store keys"),
                Err(e) => tracing::warn!(error = %e, "store purge failed"),
            }
        }
        if let Some(cache) = &self.context {
            let purged = cache.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "purged expired context cache entries");
            }
        }
    }

    /// Run until `cancel` fires.  The first tick happens one interval
    /// after start.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + self.interval,
                self.interval,
            );
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_secs = self.interval.as_secs(), "heartbeat sweeper started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.tick().await,
                }
            }
            tracing::info!("heartbeat sweeper stopped");
        })
    }
}
