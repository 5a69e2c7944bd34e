//! Data models for the metrics worker.
//!
//! This module contains the job description read from the queue, the
//! per-analyzer results, the composite record that gets persisted, and the
//! completion event sent downstream.

use crate::error::JobError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Component, Path};

/// One unit of requested work, parsed from an inbound message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Identifier of the downloaded repository (also its directory name).
    pub repo_id: String,
}

impl Job {
    /// Build a job from a bare repository id.
    pub fn new(repo_id: impl Into<String>) -> Result<Self, JobError> {
        let job = Job {
            repo_id: repo_id.into(),
        };
        job.validate()?;
        Ok(job)
    }

    /// Parse a message body.
    ///
    /// The body must be a JSON object; unknown fields are ignored. A body
    /// that is not an object, lacks a string `repo_id`, or names something
    /// other than a single directory is malformed and will never succeed on
    /// retry.
    pub fn from_payload(payload: &[u8]) -> Result<Self, JobError> {
        let body: Map<String, Value> = serde_json::from_slice(payload)
            .map_err(|e| JobError::MalformedPayload(e.to_string()))?;

        match body.get("repo_id") {
            Some(Value::String(repo_id)) => Self::new(repo_id.as_str()),
            Some(other) => Err(JobError::MalformedPayload(format!(
                "repo_id must be a string, got {}",
                other
            ))),
            None => Err(JobError::MalformedPayload(
                "missing field `repo_id`".to_string(),
            )),
        }
    }

    fn validate(&self) -> Result<(), JobError> {
        if self.repo_id.trim().is_empty() {
            return Err(JobError::MalformedPayload("repo_id is empty".to_string()));
        }

        // The raw id is also the store key; it must name the directory exactly.
        if self.repo_id.chars().any(|c| c == '/' || c == '\\') {
            return Err(JobError::MalformedPayload(format!(
                "repo_id contains a path separator: {:?}",
                self.repo_id
            )));
        }

        let mut components = Path::new(&self.repo_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(()),
            _ => Err(JobError::MalformedPayload(format!(
                "repo_id is not a plain directory name: {:?}",
                self.repo_id
            ))),
        }
    }
}

/// Output of one analyzer for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerResult {
    /// Name of the analyzer that produced the value.
    pub analyzer: String,
    /// Structured score, opaque to the worker.
    pub value: Value,
}

impl AnalyzerResult {
    pub fn new(analyzer: impl Into<String>, value: Value) -> Self {
        Self {
            analyzer: analyzer.into(),
            value,
        }
    }
}

/// Every analyzer's result for one repository.
///
/// Only ever built by the aggregator, which guarantees one entry per
/// configured analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeMetric {
    pub repo_id: String,
    pub metrics: BTreeMap<String, AnalyzerResult>,
}

impl CompositeMetric {
    /// The stored blob: analyzer name mapped to its value.
    pub fn metrics_document(&self) -> Value {
        let map = self
            .metrics
            .iter()
            .map(|(name, result)| (name.clone(), result.value.clone()))
            .collect::<serde_json::Map<String, Value>>();
        Value::Object(map)
    }
}

/// Event announcing that a repository's metrics are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub repo_id: String,
    /// Language classification of this pipeline.
    pub language_id: i64,
}
