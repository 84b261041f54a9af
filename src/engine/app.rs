//! Application wiring
//!
//! Builds every service once and hands them to the router. Must be called
//! from inside a tokio runtime: the audit workers and the cache sweeper are
//! spawned here.

use axum::Router;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::info;

use crate::engine::admin::{AdminError, AdminService};
use crate::engine::api::{create_router, ApiState, HeaderIdentity, TokenBucket};
use crate::engine::audit::{AuditPipeline, PipelineOptions, SqliteAuditSink};
use crate::engine::cache::UserInfoCache;
use crate::engine::config::{Config, ConfigError};
use crate::engine::database::{Database, DatabaseError};
use crate::engine::rbac::{Authorizer, PolicyError, PolicyStore, PolicySynchronizer};
use crate::engine::seed::seed_defaults;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("Failed to load policy: {0}")]
    Policy(#[from] PolicyError),
    #[error("Failed to seed defaults: {0}")]
    Seed(#[from] AdminError),
}

pub struct App {
    pub config: Config,
    pub db: Database,
    pub store: Arc<PolicyStore>,
    pub admin: AdminService,
    pub audit: Arc<AuditPipeline>,
    audit_permits: Arc<Semaphore>,
    rate_limit: Option<Arc<TokenBucket>>,
    sweeper: JoinHandle<()>,
}

impl App {
    /// Opens the project database named in the config.
    pub fn open(project_dir: &Path, config: Config) -> Result<Self, AppError> {
        let db = Database::new(&project_dir.join(&config.database.path))?;
        Self::build(config, db)
    }

    pub fn build(config: Config, db: Database) -> Result<Self, AppError> {
        config.validate()?;
        let store = Arc::new(PolicyStore::sqlite(db.clone())?);
        let sync = Arc::new(PolicySynchronizer::new(store.clone()));
        let cache = Arc::new(UserInfoCache::new(config.cache.ttl()));
        let admin = AdminService::new(db.clone(), sync.clone(), cache.clone());

        if config.system.init_data && seed_defaults(&db, &sync, admin.hasher.as_ref())? {
            info!(rules = store.len(), "Seeded default roles, users and apis");
        }

        let audit = Arc::new(AuditPipeline::start(
            Arc::new(SqliteAuditSink::new(db.clone())),
            PipelineOptions::from(&config.audit),
        ));
        let audit_permits = Arc::new(Semaphore::new(config.audit.queue_capacity));
        let rate_limit = TokenBucket::from_config(&config.rate_limit).map(Arc::new);
        let sweeper = cache.spawn_sweeper(config.cache.sweep_interval());

        info!(rules = store.len(), version = store.version(), "Rolegate ready");
        Ok(Self {
            config,
            db,
            store,
            admin,
            audit,
            audit_permits,
            rate_limit,
            sweeper,
        })
    }

    pub fn router(&self) -> Router {
        create_router(ApiState {
            db: self.db.clone(),
            admin: self.admin.clone(),
            authorizer: Authorizer::new(self.store.clone()),
            identity: Arc::new(HeaderIdentity::new(self.config.identity.header.clone())),
            audit: Some(self.audit.clone()),
            audit_log: SqliteAuditSink::new(self.db.clone()),
            audit_permits: self.audit_permits.clone(),
            rate_limit: self.rate_limit.clone(),
            prefix: self.config.system.url_path_prefix.clone(),
        })
    }

    /// Stops the sweeper and drains queued audit events.
    pub async fn shutdown(&self) {
        self.sweeper.abort();
        self.audit.shutdown().await;
        info!(stats = ?self.audit.stats(), "Rolegate stopped");
    }
}
