use crate::accounting::AccountingTracker;
use crate::audit::AuditLogger;
use crate::config::{Config, ConfigError};
use crate::decision::DecisionEngine;
use crate::routes;
use crate::tasks::{NoopTaskQueue, RedisTaskQueue, TaskError, TaskQueue};
use crate::vlan::NasVlanPolicy;
use nac_directory::{DirectoryClient, DirectoryError, DirectorySchema, LdapConnector};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("Task queue error: {0}")]
    TaskQueue(#[from] TaskError),
}

/// Everything a request handler needs
#[derive(Clone)]
pub struct AppState {
    pub(crate) engine: DecisionEngine,
    pub(crate) tracker: Arc<AccountingTracker>,
    pub(crate) audit: Arc<AuditLogger>,
    pub(crate) accounting_log: Arc<AuditLogger>,
    pub(crate) task_queue: Arc<dyn TaskQueue>,
    pub(crate) nas_policy: Option<NasVlanPolicy>,
    pub(crate) request_timeout: Duration,
}

impl AppState {
    /// State with logging disabled, no task queue and a 10 second deadline
    pub fn new(engine: DecisionEngine) -> Self {
        AppState {
            engine,
            tracker: Arc::new(AccountingTracker::new()),
            audit: Arc::new(AuditLogger::disabled()),
            accounting_log: Arc::new(AuditLogger::disabled()),
            task_queue: Arc::new(NoopTaskQueue),
            nas_policy: None,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_audit_log(mut self, logger: AuditLogger) -> Self {
        self.audit = Arc::new(logger);
        self
    }

    pub fn with_accounting_log(mut self, logger: AuditLogger) -> Self {
        self.accounting_log = Arc::new(logger);
        self
    }

    pub fn with_task_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.task_queue = queue;
        self
    }

    pub fn with_nas_policy(mut self, policy: Option<NasVlanPolicy>) -> Self {
        self.nas_policy = policy;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn tracker(&self) -> &AccountingTracker {
        &self.tracker
    }
}

/// HTTP backend bound to one configuration
pub struct NacServer {
    address: std::net::SocketAddr,
    state: AppState,
}

impl NacServer {
    /// Build every component from the configuration
    ///
    /// Nothing connects to the directory here; the first request opens the
    /// connection. The task queue, when configured, connects immediately.
    pub async fn new(config: &Config) -> Result<Self, ServerError> {
        config.validate()?;
        let address = config.socket_addr()?;

        let pool = config.directory.build_pool()?;
        let connector = Arc::new(LdapConnector::new(&config.directory));
        let client = Arc::new(DirectoryClient::new(pool, connector));
        let schema = DirectorySchema::new(client, config.directory.schema.clone());
        let engine = DecisionEngine::new(schema, config.vlans.quarantine_vlan);

        let task_queue: Arc<dyn TaskQueue> = match config.task_queue {
            Some(ref queue) => {
                info!(key = %queue.key, "VLAN tasks go to Redis");
                Arc::new(RedisTaskQueue::new(queue).await?)
            }
            None => Arc::new(NoopTaskQueue),
        };

        let nas_policy = config
            .vlans
            .nas_policy
            .as_ref()
            .map(NasVlanPolicy::from_config)
            .transpose()?;

        let state = AppState::new(engine)
            .with_audit_log(AuditLogger::new(config.audit_log_path.clone())?)
            .with_accounting_log(AuditLogger::new(config.accounting_log_path.clone())?)
            .with_task_queue(task_queue)
            .with_nas_policy(nas_policy)
            .with_request_timeout(Duration::from_secs(config.request_timeout));

        Ok(NacServer { address, state })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until the process stops
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.address).await?;
        info!("NAC backend listening on {}", self.address);

        let app = routes::router(self.state);
        axum::serve(listener, app).await?;
        Ok(())
    }
}
