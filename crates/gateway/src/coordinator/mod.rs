//! The coordinator runtime: session registry, event bus, connection hub,
//! heartbeat sweeper and context cache, owned by one [`Coordinator`].

pub mod events;
pub mod hub;
pub mod session_lock;
pub mod sessions;
pub mod sweeper;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use leitl_contextsync::{ContextCache, DocumentSource};
use leitl_domain::config::{Config, ConfigSeverity};
use leitl_domain::{Error, Result};
use leitl_store::{SharedStore, TimeoutStore};

use events::EventBus;
use hub::ConnectionHub;
use sessions::SessionRegistry;
use sweeper::HeartbeatSweeper;

/// Store key layout under a configurable prefix.
#[derive(Debug, Clone)]
pub(crate) struct Keys {
    prefix: String,
}

impl Keys {
    pub(crate) fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches(':').to_owned(),
        }
    }

    pub(crate) fn session(&self, id: &str) -> String {
        format!("{}:session:{id}", self.prefix)
    }

    pub(crate) fn tombstone(&self, id: &str) -> String {
        format!("{}:ended:{id}", self.prefix)
    }

    pub(crate) fn active_index(&self) -> String {
        format!("{}:sessions:active", self.prefix)
    }

    pub(crate) fn recent_messages(&self) -> String {
        format!("{}:messages:recent", self.prefix)
    }

    pub(crate) fn activity_log(&self) -> String {
        format!("{}:activity", self.prefix)
    }
}

/// Owns every coordinator component.  Build with [`Coordinator::new`],
/// then call [`Coordinator::initialize`] before serving and
/// [`Coordinator::shutdown`] on exit.
pub struct Coordinator {
    pub config: Arc<Config>,
    pub store: Arc<dyn SharedStore>,
    pub hub: Arc<ConnectionHub>,
    pub events: Arc<EventBus>,
    pub sessions: Arc<SessionRegistry>,
    pub context: Arc<ContextCache>,
    sweeper: Arc<HeartbeatSweeper>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Wire the components together.  Every store call goes through a
    /// [`TimeoutStore`] bounded by `store.timeout_ms`.
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn SharedStore>,
        source: Arc<dyn DocumentSource>,
    ) -> Self {
        let store: Arc<dyn SharedStore> =
            Arc::new(TimeoutStore::new(store, config.store.timeout()));
        let origin = format!("coord-{}", uuid::Uuid::new_v4().simple());

        let hub = Arc::new(ConnectionHub::new());
        let events = Arc::new(EventBus::new(
            store.clone(),
            hub.clone(),
            origin,
            &config.store,
            &config.events,
        ));
        let sessions = Arc::new(SessionRegistry::new(
            store.clone(),
            events.clone(),
            hub.clone(),
            &config.store,
            &config.sessions,
        ));
        let context = Arc::new(ContextCache::new(source, &config.context));
        let sweeper = Arc::new(
            HeartbeatSweeper::new(
                sessions.clone(),
                config.sessions.sweep_interval(),
                config.sessions.heartbeat_timeout(),
            )
            .with_context_cache(context.clone())
            .with_store(store.clone()),
        );

        Self {
            config,
            store,
            hub,
            events,
            sessions,
            context,
            sweeper,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Validate config, check the store, then start the event relay and
    /// the sweeper.  Any failure here aborts startup.
    pub async fn initialize(&self) -> Result<()> {
        if self.config.has_errors() {
            let errors: Vec<String> = self
                .config
                .validate()
                .into_iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .map(|i| i.to_string())
                .collect();
            return Err(Error::Config(errors.join("; ")));
        }

        self.store.ping().await?;

        let relay = self.events.clone().spawn_relay(self.cancel.child_token()).await?;
        let sweeper = self.sweeper.clone().spawn(self.cancel.child_token());
        self.tasks.lock().extend([relay, sweeper]);

        tracing::info!(
            origin = %self.events.origin(),
            heartbeat_timeout_secs = self.config.sessions.heartbeat_timeout_secs,
            sweep_interval_secs = self.config.sessions.sweep_interval_secs,
            "coordinator initialized"
        );
        Ok(())
    }

    /// Stop background tasks and wait for them to finish.  Safe to call
    /// more than once.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }
        tracing::info!(connections = self.hub.connection_count(), "coordinator stopped");
    }

    pub fn sweeper(&self) -> &HeartbeatSweeper {
        &self.sweeper
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}
