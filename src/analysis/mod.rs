//! Analysis modules.
//!
//! An [`Analyzer`] scores one repository directory. The [`AnalyzerSet`]
//! runs the configured analyzers one after the other, each bounded by its
//! own timeout, and hands the results to the aggregator.

pub mod aggregator;
pub mod command;
pub mod source_stats;

pub use aggregator::aggregate;
pub use command::CommandAnalyzer;
pub use source_stats::SourceStatsAnalyzer;

use crate::config::{AnalyzerConfig, AnalyzerKind};
use crate::error::{AnalyzerError, JobError};
use crate::models::AnalyzerResult;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// A scoring unit run against a repository directory.
///
/// Implementations must not modify the directory.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Key of this analyzer's entry in the stored metrics.
    fn name(&self) -> &str;

    async fn analyze(&self, path: &Path) -> Result<Value, AnalyzerError>;
}

struct Entry {
    analyzer: Box<dyn Analyzer>,
    timeout: Duration,
}

/// The fixed, ordered analyzer pipeline.
#[derive(Default)]
pub struct AnalyzerSet {
    entries: Vec<Entry>,
}

impl AnalyzerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the pipeline described by the configuration.
    pub fn from_config(configs: &[AnalyzerConfig]) -> Self {
        let mut set = Self::new();

        for config in configs {
            let analyzer: Box<dyn Analyzer> = match config.kind {
                AnalyzerKind::Command => Box::new(CommandAnalyzer::from_config(config)),
                AnalyzerKind::SourceStats => Box::new(SourceStatsAnalyzer::new(
                    config.name.clone(),
                    config.extensions.clone(),
                )),
            };
            set = set.with(analyzer, config.timeout());
        }

        set
    }

    /// Append an analyzer.
    pub fn with(mut self, analyzer: Box<dyn Analyzer>, timeout: Duration) -> Self {
        self.entries.push(Entry { analyzer, timeout });
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.analyzer.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Run every analyzer in order, stopping at the first failure.
    pub async fn run_all(&self, path: &Path) -> Result<Vec<AnalyzerResult>, JobError> {
        let mut results = Vec::with_capacity(self.entries.len());

        for entry in &self.entries {
            let name = entry.analyzer.name();
            debug!("Running analyzer {} on {}", name, path.display());

            let value = match tokio::time::timeout(entry.timeout, entry.analyzer.analyze(path)).await
            {
                Ok(Ok(value)) => value,
                Ok(Err(source)) => {
                    return Err(JobError::Analyzer {
                        analyzer: name.to_string(),
                        source,
                    })
                }
                Err(_) => {
                    return Err(JobError::AnalyzerTimeout {
                        analyzer: name.to_string(),
                        timeout: entry.timeout,
                    })
                }
            };

            results.push(AnalyzerResult::new(name, value));
        }

        Ok(results)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Analyzer doubles shared by the pipeline and worker tests.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Returns a fixed value and counts its invocations.
    pub struct StaticAnalyzer {
        pub name: String,
        pub value: Value,
        pub calls: Arc<AtomicUsize>,
    }

    impl StaticAnalyzer {
        pub fn new(name: &str, value: Value) -> Self {
            Self {
                name: name.to_string(),
                value,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Analyzer for StaticAnalyzer {
        fn name(&self) -> &str {
            &self.name
        }

        async fn analyze(&self, _path: &Path) -> Result<Value, AnalyzerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.value.clone())
        }
    }

    /// Always fails.
    pub struct FailingAnalyzer(pub String);

    #[async_trait]
    impl Analyzer for FailingAnalyzer {
        fn name(&self) -> &str {
            &self.0
        }

        async fn analyze(&self, _path: &Path) -> Result<Value, AnalyzerError> {
            Err(AnalyzerError::InvalidOutput("boom".to_string()))
        }
    }

    /// Sleeps far longer than any test timeout.
    pub struct HangingAnalyzer(pub String);

    #[async_trait]
    impl Analyzer for HangingAnalyzer {
        fn name(&self) -> &str {
            &self.0
        }

        async fn analyze(&self, _path: &Path) -> Result<Value, AnalyzerError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_run_all_in_order() {
        let set = AnalyzerSet::new()
            .with(Box::new(StaticAnalyzer::new("flog", json!(1.5))), TIMEOUT)
            .with(Box::new(StaticAnalyzer::new("rubycritic", json!(90))), TIMEOUT);

        let results = set.run_all(Path::new(".")).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0], AnalyzerResult::new("flog", json!(1.5)));
        assert_eq!(results[1], AnalyzerResult::new("rubycritic", json!(90)));
        assert_eq!(set.names(), vec!["flog", "rubycritic"]);
    }

    #[tokio::test]
    async fn test_run_all_stops_at_first_failure() {
        let last = StaticAnalyzer::new("cycromatic", json!(3));
        let last_calls = last.calls.clone();

        let set = AnalyzerSet::new()
            .with(Box::new(StaticAnalyzer::new("flog", json!(1.5))), TIMEOUT)
            .with(Box::new(FailingAnalyzer("rubycritic".to_string())), TIMEOUT)
            .with(Box::new(last), TIMEOUT);

        let err = set.run_all(Path::new(".")).await.unwrap_err();

        assert!(matches!(err, JobError::Analyzer { ref analyzer, .. } if analyzer == "rubycritic"));
        assert!(!err.is_permanent());
        assert_eq!(last_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_all_enforces_timeout() {
        let set = AnalyzerSet::new().with(
            Box::new(HangingAnalyzer("rubycritic".to_string())),
            Duration::from_millis(50),
        );

        let err = set.run_all(Path::new(".")).await.unwrap_err();
        assert!(
            matches!(err, JobError::AnalyzerTimeout { ref analyzer, .. } if analyzer == "rubycritic")
        );
        assert!(err.to_string().ends_with("after 50ms"), "{}", err);
    }

    #[test]
    fn test_from_config() {
        let config = crate::config::Config::default();
        let set = AnalyzerSet::from_config(&config.analyzers);
        assert_eq!(set.len(), 3);
        assert_eq!(set.names(), vec!["flog", "rubycritic", "cycromatic"]);
    }
}
