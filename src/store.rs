//! Persistence of composite metrics.
//!
//! The store is the system of record. Writes are upserts keyed by
//! `repo_id`, so replaying a job converges to the same row.

use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::models::CompositeMetric;
use async_trait::async_trait;
use tokio_postgres::types::Json;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

/// Idempotent storage for composite metrics.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Insert or replace the row of `metric.repo_id`.
    async fn upsert(&self, metric: &CompositeMetric) -> Result<(), StoreError>;
}

/// Whether `name` can be spliced into SQL as an unquoted identifier.
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         repo_id TEXT PRIMARY KEY, \
         metrics JSONB NOT NULL, \
         created_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
         updated_at TIMESTAMPTZ NOT NULL DEFAULT now())",
        table
    )
}

fn upsert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {} (repo_id, metrics) VALUES ($1, $2) \
         ON CONFLICT (repo_id) DO UPDATE SET metrics = EXCLUDED.metrics, updated_at = now()",
        table
    )
}

/// PostgreSQL-backed store.
pub struct PostgresStore {
    client: Client,
    upsert_sql: String,
}

impl PostgresStore {
    /// Connect and spawn the connection task.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        if !is_valid_table_name(&config.table) {
            return Err(StoreError::InvalidTable(config.table.clone()));
        }

        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .user(&config.username)
            .dbname(&config.database);
        if let Some(ref password) = config.password {
            pg.password(password);
        }

        info!(
            "Connecting to PostgreSQL at {}:{}/{}",
            config.host, config.port, config.database
        );
        let (client, connection) = pg.connect(NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        debug!("Using table {}", config.table);
        Ok(Self {
            client,
            upsert_sql: upsert_sql(&config.table),
        })
    }

    /// Create the metrics table if it does not exist yet.
    pub async fn ensure_schema(&self, table: &str) -> Result<(), StoreError> {
        if !is_valid_table_name(table) {
            return Err(StoreError::InvalidTable(table.to_string()));
        }
        self.client.batch_execute(&create_table_sql(table)).await?;
        Ok(())
    }
}

#[async_trait]
impl MetricStore for PostgresStore {
    async fn upsert(&self, metric: &CompositeMetric) -> Result<(), StoreError> {
        if self.client.is_closed() {
            return Err(StoreError::Unavailable("connection closed".to_string()));
        }

        let document = Json(metric.metrics_document());
        let rows = self
            .client
            .execute(&self.upsert_sql, &[&metric.repo_id, &document])
            .await?;
        debug!("Upserted {} row(s) for {}", rows, metric.repo_id);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryStore;
    use super::*;
    use crate::models::AnalyzerResult;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_table_name_validation() {
        assert!(is_valid_table_name("ruby_metrics"));
        assert!(is_valid_table_name("_metrics2"));
        assert!(!is_valid_table_name(""));
        assert!(!is_valid_table_name("2metrics"));
        assert!(!is_valid_table_name("Metrics"));
        assert!(!is_valid_table_name("metrics; drop table x"));
        assert!(!is_valid_table_name(&"a".repeat(64)));
    }

    #[test]
    fn test_upsert_sql() {
        let sql = upsert_sql("ruby_metrics");
        assert!(sql.starts_with("INSERT INTO ruby_metrics (repo_id, metrics)"));
        assert!(sql.contains("ON CONFLICT (repo_id) DO UPDATE"));
        assert!(create_table_sql("ruby_metrics").contains("repo_id TEXT PRIMARY KEY"));
    }

    #[tokio::test]
    async fn test_memory_store_upsert_is_idempotent() {
        let store = MemoryStore::default();
        let mut metrics = BTreeMap::new();
        metrics.insert("flog".to_string(), AnalyzerResult::new("flog", json!(3.5)));
        let composite = CompositeMetric {
            repo_id: "abc123".to_string(),
            metrics,
        };

        store.upsert(&composite).await.unwrap();
        let first = store.row("abc123");
        store.upsert(&composite).await.unwrap();

        assert_eq!(store.row("abc123"), first);
        assert_eq!(store.rows.lock().unwrap().len(), 1);
    }
}
