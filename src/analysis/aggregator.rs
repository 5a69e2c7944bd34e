//! Combination of analyzer results into one composite record.
//!
//! The composite is all-or-nothing: it exists only when every configured
//! analyzer contributed exactly one result.

use crate::error::JobError;
use crate::models::{AnalyzerResult, CompositeMetric};
use std::collections::BTreeMap;

/// Build the composite for `repo_id` from one result per expected analyzer.
pub fn aggregate(
    repo_id: &str,
    expected: &[String],
    results: Vec<AnalyzerResult>,
) -> Result<CompositeMetric, JobError> {
    let incomplete = |reason: String| JobError::IncompleteComposite {
        repo_id: repo_id.to_string(),
        reason,
    };

    let mut metrics = BTreeMap::new();

    for result in results {
        if !expected.contains(&result.analyzer) {
            return Err(incomplete(format!("unexpected analyzer {}", result.analyzer)));
        }
        if metrics.contains_key(&result.analyzer) {
            return Err(incomplete(format!("duplicate result for {}", result.analyzer)));
        }
        metrics.insert(result.analyzer.clone(), result);
    }

    let missing: Vec<&str> = expected
        .iter()
        .filter(|name| !metrics.contains_key(*name))
        .map(String::as_str)
        .collect();

    if !missing.is_empty() {
        return Err(incomplete(format!("missing {}", missing.join(", "))));
    }

    Ok(CompositeMetric {
        repo_id: repo_id.to_string(),
        metrics,
    })
}
