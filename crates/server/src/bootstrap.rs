use std::sync::Arc;

use signflow_core::config::{AppConfig, ConfigError};
use signflow_core::{StaticDirectory, StaticFormCatalog};
use signflow_db::{
    connect_with_config, migrations, DbPool, SqlDocumentRepository, SqlTempDocumentRepository,
};
use thiserror::Error;
use tracing::info;

use crate::audit::TracingAuditSink;
use crate::service::{ApprovalService, ServiceSettings};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<ApprovalService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let service = ApprovalService::new(
        Arc::new(SqlDocumentRepository::new(db_pool.clone())),
        Arc::new(SqlTempDocumentRepository::new(db_pool.clone())),
        Arc::new(StaticDirectory::from_config(&config.directory)),
        Arc::new(StaticFormCatalog::from_config(&config.directory)),
        Arc::new(TracingAuditSink),
        ServiceSettings::from(&config.routing),
    );
    info!(
        event_name = "system.bootstrap.service_ready",
        correlation_id = "bootstrap",
        administrators = config.directory.administrators.len(),
        members = config.directory.members.len(),
        "approval service assembled"
    );

    Ok(Application { config, db_pool, service: Arc::new(service) })
}
