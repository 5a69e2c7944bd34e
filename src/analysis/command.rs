//! Analyzers backed by external metric tools.
//!
//! The tool runs with the repository as its working directory. Its stdout is
//! either a JSON document or a report whose first number is the score
//! (`flog --score` prints `   123.4: flog total`).

use super::Analyzer;
use crate::config::{AnalyzerConfig, OutputFormat};
use crate::error::AnalyzerError;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Maximum number of stderr characters kept in error messages.
const STDERR_LIMIT: usize = 2048;

/// Runs an external program against a repository.
#[derive(Debug, Clone)]
pub struct CommandAnalyzer {
    name: String,
    program: String,
    args: Vec<String>,
    output: OutputFormat,
}

impl CommandAnalyzer {
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        args: Vec<String>,
        output: OutputFormat,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            output,
        }
    }

    /// Build from configuration; the program defaults to the analyzer name.
    pub fn from_config(config: &AnalyzerConfig) -> Self {
        Self::new(
            config.name.clone(),
            config
                .program
                .clone()
                .unwrap_or_else(|| config.name.clone()),
            config.args.clone(),
            config.output,
        )
    }
}

#[async_trait]
impl Analyzer for CommandAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, path: &Path) -> Result<Value, AnalyzerError> {
        debug!("Executing {} {:?} in {}", self.program, self.args, path.display());

        // Dropping the future on timeout kills the child.
        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| AnalyzerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.trim().chars().take(STDERR_LIMIT).collect();
            return Err(AnalyzerError::ExitStatus {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_output(&stdout, self.output)
    }
}

/// Interpret a tool's stdout.
pub fn parse_output(stdout: &str, format: OutputFormat) -> Result<Value, AnalyzerError> {
    match format {
        OutputFormat::Json => serde_json::from_str(stdout.trim())
            .map_err(|e| AnalyzerError::InvalidOutput(format!("expected JSON: {}", e))),
        OutputFormat::Score => first_number(stdout)
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| AnalyzerError::InvalidOutput(truncate(stdout))),
    }
}

fn first_number(text: &str) -> Option<f64> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .map(|token| token.trim_matches(|c: char| c == ':' || c == '(' || c == ')'))
        .filter(|token| !token.is_empty())
        .find_map(|token| token.parse::<f64>().ok().filter(|n| n.is_finite()))
}

fn truncate(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        "empty output".to_string()
    } else {
        text.chars().take(200).collect()
    }
}
