//! B2BUA engine: wires the call registry to its collaborators and runs the
//! background services around it

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::B2buaConfig;
use crate::core::signals::{spawn_signal_handlers, AdminControl};
use crate::interfaces::accounting::{AccountingClient, NoopAccounting};
use crate::interfaces::auth::AuthClient;
use crate::interfaces::leg::LegFactory;
use crate::interfaces::lifecycle::{ExecRestart, ProcessLifecycle};
use crate::interfaces::media_relay::MediaRelayClient;
use crate::interfaces::resolver::{Resolver, SystemResolver};
use crate::interfaces::transaction::TransactionLayer;
use crate::services::admin::AdminServer;
use crate::services::call::{CallServices, CallSettings};
use crate::services::cdr::{CdrAccounting, FileCdrStorage};
use crate::services::registry::CallMap;
use crate::{Error, Result};

/// Engine status information
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub running: bool,
    pub uptime: Duration,
    pub active_calls: usize,
    pub debug_mode: bool,
    pub safe_restart_pending: bool,
}

pub struct B2buaEngine {
    config: Arc<B2buaConfig>,

    // Collaborators
    legs: Arc<dyn LegFactory>,
    transactions: Arc<dyn TransactionLayer>,
    resolver: Arc<dyn Resolver>,
    lifecycle: Arc<dyn ProcessLifecycle>,
    auth: Option<Arc<dyn AuthClient>>,
    media_relay: Option<Arc<dyn MediaRelayClient>>,
    install_signals: bool,

    // Runtime state
    calls: Option<Arc<CallMap>>,
    is_running: Arc<RwLock<bool>>,
    start_time: Option<Instant>,
    shutdown: CancellationToken,

    // Background tasks
    tasks: Vec<JoinHandle<()>>,
    cdr_writer: Option<JoinHandle<()>>,
}

impl B2buaEngine {
    /// The transport supplies the legs and the transaction layer; the rest
    /// defaults to system resolution and re-exec on safe restart.
    pub fn new(
        config: B2buaConfig,
        legs: Arc<dyn LegFactory>,
        transactions: Arc<dyn TransactionLayer>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            legs,
            transactions,
            resolver: Arc::new(SystemResolver),
            lifecycle: Arc::new(ExecRestart::capture()?),
            auth: None,
            media_relay: None,
            install_signals: true,
            calls: None,
            is_running: Arc::new(RwLock::new(false)),
            start_time: None,
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
            cdr_writer: None,
        })
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthClient>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_media_relay(mut self, relay: Arc<dyn MediaRelayClient>) -> Self {
        self.media_relay = Some(relay);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn ProcessLifecycle>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Skip OS signal handlers, for embedding next to other handlers
    pub fn without_signals(mut self) -> Self {
        self.install_signals = false;
        self
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.is_running().await {
            return Err(Error::invalid_state("engine already running"));
        }
        info!("Starting {} v{}", crate::NAME, crate::VERSION);

        let services = self.build_services().await?;
        let calls = Arc::new(CallMap::new(
            Arc::clone(&self.config),
            Arc::new(services),
            Arc::clone(&self.transactions),
            Arc::clone(&self.lifecycle),
        ));

        let admin = AdminServer::bind(&self.config.admin.socket_path, Arc::clone(&calls))?;
        self.tasks.push(tokio::spawn(admin.run(self.shutdown.clone())));

        if self.install_signals {
            let target: Arc<dyn AdminControl> = calls.clone();
            self.tasks
                .push(spawn_signal_handlers(target, self.shutdown.clone())?);
        }

        self.tasks.push(tokio::spawn(
            Arc::clone(&calls).run_housekeeping(self.shutdown.clone()),
        ));

        self.calls = Some(calls);
        *self.is_running.write().await = true;
        self.start_time = Some(Instant::now());

        info!("B2BUA engine started");
        Ok(())
    }

    async fn build_services(&mut self) -> Result<CallServices> {
        let mut settings = CallSettings::from_config(&self.config)?;
        if let Some(route) = settings.static_route.as_mut() {
            if !route.is_caller_host() {
                // Left unresolved on failure, calls retry per request
                if let Err(e) = route.resolve(self.resolver.as_ref()).await {
                    warn!("Static route {} not resolved at startup: {}", route.hostport, e);
                }
            }
        }

        let accounting: Option<Arc<dyn AccountingClient>> = if self.config.accounting.enabled {
            match &self.config.accounting.cdr_directory {
                Some(dir) => {
                    let storage = Arc::new(FileCdrStorage::new(
                        PathBuf::from(dir),
                        self.config.accounting.rotation_size_mb,
                    ));
                    let (client, writer) = CdrAccounting::spawn(
                        storage,
                        self.config.general.node_id.clone(),
                        self.config.accounting.send_start,
                    );
                    self.cdr_writer = Some(writer);
                    Some(Arc::new(client))
                }
                None => {
                    warn!("Accounting enabled without a CDR directory, records are discarded");
                    Some(Arc::new(NoopAccounting))
                }
            }
        } else {
            None
        };

        if self.config.auth.enabled && self.auth.is_none() {
            warn!("Authorization enabled but no backend attached, calls use the static route");
        }
        let media_relay = if self.config.media_relay.enabled {
            self.media_relay.clone()
        } else {
            None
        };

        Ok(CallServices {
            settings,
            legs: Arc::clone(&self.legs),
            resolver: Arc::clone(&self.resolver),
            auth: if self.config.auth.enabled { self.auth.clone() } else { None },
            accounting,
            media_relay,
        })
    }

    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping B2BUA engine");
        *self.is_running.write().await = false;

        self.shutdown.cancel();
        if let Some(calls) = self.calls.take() {
            calls.disconnect_all("shutdown");
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Background task failed: {}", e);
            }
        }

        // The writer ends once the last call releases its accounting client
        if let Some(writer) = self.cdr_writer.take() {
            if tokio::time::timeout(Duration::from_secs(5), writer).await.is_err() {
                warn!("CDR writer still busy at shutdown");
            }
        }

        info!("B2BUA engine stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Registry the transport hands new requests to
    pub fn calls(&self) -> Option<Arc<CallMap>> {
        self.calls.clone()
    }

    pub fn config(&self) -> &B2buaConfig {
        &self.config
    }

    pub async fn status(&self) -> EngineStatus {
        let calls = self.calls.as_ref();
        EngineStatus {
            running: self.is_running().await,
            uptime: self.start_time.map(|start| start.elapsed()).unwrap_or_default(),
            active_calls: calls.map_or(0, |c| c.len()),
            debug_mode: calls.map_or(false, |c| c.debug_mode()),
            safe_restart_pending: calls.map_or(false, |c| c.safe_restart_pending()),
        }
    }
}

impl Drop for B2buaEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{invite, settle, test_config, MockLegFactory, MockLifecycle, MockTransactions, StaticResolver};
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> B2buaEngine {
        let mut config = test_config();
        config.auth.enabled = false;
        config.routing.static_route = Some("gw1.example.net".to_string());
        config.admin.socket_path = dir.path().join("admin.sock").to_string_lossy().to_string();
        config.accounting.cdr_directory = Some(dir.path().join("cdr").to_string_lossy().to_string());

        B2buaEngine::new(
            config,
            Arc::new(MockLegFactory::default()),
            Arc::new(MockTransactions::default()),
        )
        .unwrap()
        .with_resolver(Arc::new(StaticResolver::new().with_host("gw1.example.net", &["192.0.2.20"])))
        .with_lifecycle(Arc::new(MockLifecycle::default()))
        .without_signals()
    }

    #[tokio::test]
    async fn test_engine_status_before_start() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let status = engine.status().await;
        assert!(!status.running);
        assert_eq!(status.uptime, Duration::ZERO);
        assert_eq!(status.active_calls, 0);
        assert!(engine.calls().is_none());
    }

    #[tokio::test]
    async fn test_engine_lifecycle() {
        let dir = TempDir::new().unwrap();
        let mut engine = engine(&dir);
        engine.start().await.unwrap();
        assert!(engine.is_running().await);
        assert!(dir.path().join("admin.sock").exists());
        assert!(engine.start().await.is_err());

        let calls = engine.calls().unwrap();
        let response = calls.recv_request(invite("2000")).await;
        assert_eq!(response.map(|r| r.code), Some(100));
        settle().await;
        assert_eq!(engine.status().await.active_calls, 1);
        drop(calls);

        engine.stop().await.unwrap();
        assert!(!engine.is_running().await);
        assert!(!dir.path().join("admin.sock").exists());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = test_config();
        config.routing.static_route = Some("gw.example.net;credit-time=abc".to_string());
        let result = B2buaEngine::new(
            config,
            Arc::new(MockLegFactory::default()),
            Arc::new(MockTransactions::default()),
        );
        assert!(result.is_err());
    }
}
