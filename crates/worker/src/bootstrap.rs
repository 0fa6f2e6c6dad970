use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use parley_agent::{
    GenerationError, InMemoryStore, InMemoryTriggerQueue, OutboundReply, PauseController,
    ReplyPipeline, ReplyWorker,
};
use parley_core::config::{AppConfig, ConfigError, LoadOptions};
use parley_core::{Conversation, TriggerMessage};
use parley_db::repositories::{SqlConversationRepository, SqlMessageRepository};
use parley_db::{connect, migrations, DbPool};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub queue: Arc<InMemoryTriggerQueue>,
    pub guard: Arc<PauseController>,
    pub worker: ReplyWorker,
    pub pipeline_configured: bool,
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

/// Placeholder used when no generation pipeline has been wired in. Nothing
/// enqueues jobs in that configuration, so this is never invoked in practice.
struct UnconfiguredPipeline;

#[async_trait]
impl ReplyPipeline for UnconfiguredPipeline {
    async fn generate(
        &self,
        _conversation: &Conversation,
        _effective_message: &TriggerMessage,
    ) -> Result<OutboundReply, GenerationError> {
        Err(GenerationError::permanent("no generation pipeline configured"))
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config, None).await
}

pub async fn bootstrap_with_config(
    config: AppConfig,
    pipeline: Option<Arc<dyn ReplyPipeline>>,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting worker bootstrap"
    );

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
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

    let conversations = Arc::new(SqlConversationRepository::new(db_pool.clone()));
    let messages = Arc::new(SqlMessageRepository::new(db_pool.clone()));
    let store = Arc::new(InMemoryStore::default());
    let queue = Arc::new(InMemoryTriggerQueue::default());

    let guard = Arc::new(PauseController::new(
        conversations.clone(),
        messages.clone(),
        store,
        queue.clone(),
        config.guard.clone(),
    ));

    let pipeline_configured = pipeline.is_some();
    let pipeline = pipeline.unwrap_or_else(|| Arc::new(UnconfiguredPipeline));
    let worker = ReplyWorker::new(
        queue.clone(),
        conversations,
        messages,
        pipeline,
        guard.clone(),
        config.guard.retry_threshold,
    );

    Ok(Application { config, db_pool, queue, guard, worker, pipeline_configured })
}

#[cfg(test)]
mod tests {
    use parley_agent::JobOutcome;
    use parley_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn memory_options(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_unsupported_database_url() {
        let result = bootstrap(memory_options("postgres://localhost/parley")).await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("database.url"));
    }

    #[tokio::test]
    async fn bootstrap_applies_schema_and_yields_an_idle_worker() {
        let app = bootstrap(memory_options("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed against an in-memory database");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('conversation', 'message')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 2, "bootstrap should create the conversation and message tables");

        let outcome = app.worker.process_next().await.expect("empty queue poll");
        assert_eq!(outcome, JobOutcome::Idle);
        assert!(!app.pipeline_configured);

        app.db_pool.close().await;
    }
}
