//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.metrics-worker.toml` files, the process environment, and CLI flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".metrics-worker.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Message broker settings.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Metrics database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Worker settings.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Analyzers, run in the listed order.
    #[serde(default = "default_analyzers")]
    pub analyzers: Vec<AnalyzerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            database: DatabaseConfig::default(),
            worker: WorkerConfig::default(),
            analyzers: default_analyzers(),
        }
    }
}

/// RabbitMQ settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,

    #[serde(default = "default_broker_port")]
    pub port: u16,

    #[serde(default = "default_broker_user")]
    pub username: String,

    #[serde(default = "default_broker_user")]
    pub password: String,

    #[serde(default = "default_vhost")]
    pub vhost: String,

    /// Queue jobs are pulled from.
    #[serde(default = "default_queue")]
    pub queue: String,

    /// Declare the queue as durable.
    #[serde(default = "default_true")]
    pub durable: bool,

    /// Exchange completion events go to ("" is the default exchange).
    #[serde(default)]
    pub completion_exchange: String,

    /// Routing key of completion events.
    #[serde(default = "default_completion_routing_key")]
    pub completion_routing_key: String,

    /// Delay between polls while the queue is empty.
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            username: default_broker_user(),
            password: default_broker_user(),
            vhost: default_vhost(),
            queue: default_queue(),
            durable: true,
            completion_exchange: String::new(),
            completion_routing_key: default_completion_routing_key(),
            idle_delay_ms: default_idle_delay_ms(),
        }
    }
}

impl BrokerConfig {
    /// AMQP connection URI, with credentials and vhost percent-encoded.
    pub fn uri(&self) -> String {
        let vhost = if self.vhost == "/" {
            "%2f".to_string()
        } else {
            urlencoding::encode(self.vhost.trim_start_matches('/')).into_owned()
        };
        format!(
            "amqp://{}:{}@{}:{}/{}",
            urlencoding::encode(&self.username),
            urlencoding::encode(&self.password),
            self.host,
            self.port,
            vhost
        )
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    5672
}

fn default_broker_user() -> String {
    "guest".to_string()
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_queue() -> String {
    "analyze-ruby".to_string()
}

fn default_completion_routing_key() -> String {
    "gc".to_string()
}

fn default_idle_delay_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

/// PostgreSQL settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default = "default_db_user")]
    pub username: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_db_name")]
    pub database: String,

    /// Table holding one row per repository.
    #[serde(default = "default_table")]
    pub table: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            username: default_db_user(),
            password: None,
            database: default_db_name(),
            table: default_table(),
        }
    }
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_db_name() -> String {
    "metrics".to_string()
}

fn default_table() -> String {
    "ruby_metrics".to_string()
}

/// Worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Directory holding one downloaded repository per `repo_id`.
    #[serde(default = "default_repositories_dir")]
    pub repositories_dir: PathBuf,

    /// Language classification sent with every completion event.
    #[serde(default = "default_language_id")]
    pub language_id: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            repositories_dir: default_repositories_dir(),
            language_id: default_language_id(),
        }
    }
}

fn default_repositories_dir() -> PathBuf {
    PathBuf::from("/repositories/")
}

fn default_language_id() -> i64 {
    1
}

/// Kind of analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    /// External tool run inside the repository directory.
    #[default]
    Command,
    /// Built-in file and line counter.
    SourceStats,
}

/// How a command analyzer's stdout is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// The whole of stdout is a JSON document.
    Json,
    /// The first number found in stdout.
    #[default]
    Score,
}

/// One analyzer of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Key of the analyzer's entry in the stored metrics.
    pub name: String,

    #[serde(default)]
    pub kind: AnalyzerKind,

    /// Executable (command analyzers only).
    #[serde(default)]
    pub program: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub output: OutputFormat,

    /// File extensions counted (source-stats analyzers only).
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Upper bound on one run.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl AnalyzerConfig {
    fn command(name: &str, args: &[&str], output: OutputFormat) -> Self {
        Self {
            name: name.to_string(),
            kind: AnalyzerKind::Command,
            program: Some(name.to_string()),
            args: args.iter().map(|a| a.to_string()).collect(),
            output,
            extensions: default_extensions(),
            timeout_seconds: default_timeout(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_analyzers() -> Vec<AnalyzerConfig> {
    vec![
        AnalyzerConfig::command("flog", &["--score", "."], OutputFormat::Score),
        AnalyzerConfig::command(
            "rubycritic",
            &["--format", "console", "--no-browser", "--minimum-score", "0", "."],
            OutputFormat::Score,
        ),
        AnalyzerConfig::command("cycromatic", &["--format=json", "."], OutputFormat::Json),
    ]
}

fn default_extensions() -> Vec<String> {
    vec!["rb", "rake", "gemspec"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_timeout() -> u64 {
    600 // 10 min; rubycritic on large repositories is slow
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments (and the environment variables clap reads for them)
    /// take precedence over config file settings. Only explicitly provided
    /// values override.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref host) = args.rmq_host {
            self.broker.host = host.clone();
        }
        if let Some(port) = args.rmq_port {
            self.broker.port = port;
        }
        if let Some(ref queue) = args.queue {
            self.broker.queue = queue.clone();
        }
        if let Some(ms) = args.idle_delay_ms {
            self.broker.idle_delay_ms = ms;
        }

        if let Some(ref host) = args.db_host {
            self.database.host = host.clone();
        }
        if let Some(port) = args.db_port {
            self.database.port = port;
        }
        if let Some(ref username) = args.db_username {
            self.database.username = username.clone();
        }
        if let Some(ref password) = args.db_password {
            self.database.password = Some(password.clone());
        }
        if let Some(ref database) = args.db_database {
            self.database.database = database.clone();
        }

        if let Some(ref dir) = args.repositories_dir {
            self.worker.repositories_dir = dir.clone();
        }
        if let Some(language_id) = args.language_id {
            self.worker.language_id = language_id;
        }
    }

    /// Check invariants the worker relies on.
    pub fn validate(&self) -> Result<()> {
        if self.analyzers.is_empty() {
            anyhow::bail!("At least one analyzer must be configured");
        }

        let mut seen = HashSet::new();
        for analyzer in &self.analyzers {
            if analyzer.name.trim().is_empty() {
                anyhow::bail!("Analyzer names must not be empty");
            }
            if !seen.insert(analyzer.name.as_str()) {
                anyhow::bail!("Duplicate analyzer name: {}", analyzer.name);
            }
            if analyzer.timeout_seconds == 0 {
                anyhow::bail!("Analyzer {} must have a timeout of at least 1s", analyzer.name);
            }
            if analyzer.kind == AnalyzerKind::Command && analyzer.program.is_none() {
                anyhow::bail!("Command analyzer {} has no program", analyzer.name);
            }
        }

        if !crate::store::is_valid_table_name(&self.database.table) {
            anyhow::bail!("Invalid table name: {:?}", self.database.table);
        }

        if self.broker.queue.is_empty() {
            anyhow::bail!("Queue name must not be empty");
        }

        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
