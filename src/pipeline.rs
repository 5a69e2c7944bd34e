//! The fixed per-job pipeline.
//!
//! resolve → analyze → aggregate → persist → publish. Every stage reports
//! failure as a [`JobError`]; classification is left to the worker.

use crate::analysis::{aggregate, AnalyzerSet};
use crate::broker::CompletionPublisher;
use crate::error::JobError;
use crate::models::{CompletionEvent, CompositeMetric, Job};
use crate::resolver::ArtifactResolver;
use crate::store::MetricStore;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Pipeline {
    resolver: ArtifactResolver,
    analyzers: AnalyzerSet,
    store: Arc<dyn MetricStore>,
    publisher: Arc<dyn CompletionPublisher>,
    language_id: i64,
}

impl Pipeline {
    pub fn new(
        resolver: ArtifactResolver,
        analyzers: AnalyzerSet,
        store: Arc<dyn MetricStore>,
        publisher: Arc<dyn CompletionPublisher>,
        language_id: i64,
    ) -> Self {
        Self {
            resolver,
            analyzers,
            store,
            publisher,
            language_id,
        }
    }

    /// Resolve the repository and build its composite without side effects.
    pub async fn collect(&self, job: &Job) -> Result<CompositeMetric, JobError> {
        collect_metrics(&self.resolver, &self.analyzers, job).await
    }

    /// Run every stage for `job`.
    pub async fn run(&self, job: &Job) -> Result<CompositeMetric, JobError> {
        let composite = self.collect(job).await?;

        self.store
            .upsert(&composite)
            .await
            .map_err(JobError::Persistence)?;

        let event = CompletionEvent {
            repo_id: job.repo_id.clone(),
            language_id: self.language_id,
        };
        self.publisher
            .publish(&event)
            .await
            .map_err(JobError::Publish)?;

        Ok(composite)
    }
}

/// Resolve, analyze, and aggregate. Shared with the dry-run mode.
pub async fn collect_metrics(
    resolver: &ArtifactResolver,
    analyzers: &AnalyzerSet,
    job: &Job,
) -> Result<CompositeMetric, JobError> {
    let repo_path = resolver.resolve(&job.repo_id)?;

    info!("Collecting metrics for '{}'", job.repo_id);
    let results = analyzers.run_all(&repo_path).await?;
    let composite = aggregate(&job.repo_id, &analyzers.names(), results)?;
    debug!("Collected metrics: {}", composite.metrics_document());

    Ok(composite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testing::{FailingAnalyzer, StaticAnalyzer};
    use crate::broker::testing::FakePublisher;
    use crate::store::testing::MemoryStore;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn analyzers() -> AnalyzerSet {
        AnalyzerSet::new()
            .with(Box::new(StaticAnalyzer::new("flog", json!(10.0))), TIMEOUT)
            .with(Box::new(StaticAnalyzer::new("rubycritic", json!(75.0))), TIMEOUT)
    }

    fn job(repo_id: &str) -> Job {
        Job {
            repo_id: repo_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_collect_without_side_effects() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("abc123")).unwrap();

        let composite = collect_metrics(
            &ArtifactResolver::new(temp_dir.path()),
            &analyzers(),
            &job("abc123"),
        )
        .await
        .unwrap();

        let names: Vec<_> = composite.metrics.keys().collect();
        assert_eq!(names, vec!["flog", "rubycritic"]);
    }

    #[tokio::test]
    async fn test_run_persists_then_publishes() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("abc123")).unwrap();
        let store = Arc::new(MemoryStore::default());
        let publisher = Arc::new(FakePublisher::default());

        let pipeline = Pipeline::new(
            ArtifactResolver::new(temp_dir.path()),
            analyzers(),
            store.clone(),
            publisher.clone(),
            7,
        );
        pipeline.run(&job("abc123")).await.unwrap();

        assert_eq!(
            store.row("abc123"),
            Some(json!({"flog": 10.0, "rubycritic": 75.0}))
        );
        assert_eq!(
            publisher.events(),
            vec![CompletionEvent {
                repo_id: "abc123".to_string(),
                language_id: 7
            }]
        );
    }

    #[tokio::test]
    async fn test_run_analyzer_failure_skips_persistence() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("abc123")).unwrap();
        let store = Arc::new(MemoryStore::default());
        let publisher = Arc::new(FakePublisher::default());

        let analyzers = analyzers().with(Box::new(FailingAnalyzer("cycromatic".to_string())), TIMEOUT);
        let pipeline = Pipeline::new(
            ArtifactResolver::new(temp_dir.path()),
            analyzers,
            store.clone(),
            publisher.clone(),
            7,
        );

        assert!(pipeline.run(&job("abc123")).await.is_err());
        assert_eq!(store.upsert_count(), 0);
        assert!(publisher.events().is_empty());
    }
}
