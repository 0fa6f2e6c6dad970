use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use parley_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

/// Open a pool sized and timed per the `[database]` config section.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let timeout_secs = timeout_secs.max(1);
    // Writers contend under WAL; let sqlite block up to the same budget the
    // pool grants for acquiring a connection.
    let busy_timeout_ms = timeout_secs * 1000;

    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query(&format!("PRAGMA busy_timeout = {busy_timeout_ms}"))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}
