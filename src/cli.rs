//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap. Connection
//! settings can also come from the environment variables the deployment
//! already sets (`RMQ_HOST`, `DB_HOST`, ...).

use clap::Parser;
use std::path::PathBuf;

/// Metrics Worker - collects code metrics for queued repositories
///
/// Pulls `{"repo_id": "..."}` jobs from RabbitMQ, runs the configured
/// metric tools against the downloaded repository, stores the results in
/// PostgreSQL, and announces completion downstream.
///
/// Examples:
///   metrics-worker
///   metrics-worker --config worker.toml --verbose
///   metrics-worker --analyze abc123 --repositories-dir ./repos
///   metrics-worker --init-config
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .metrics-worker.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// RabbitMQ host
    #[arg(long, env = "RMQ_HOST", value_name = "HOST")]
    pub rmq_host: Option<String>,

    /// RabbitMQ port
    #[arg(long, env = "RMQ_PORT", value_name = "PORT")]
    pub rmq_port: Option<u16>,

    /// Queue to pull jobs from
    #[arg(long, value_name = "NAME")]
    pub queue: Option<String>,

    /// Delay between polls of an empty queue, in milliseconds
    #[arg(long, value_name = "MS")]
    pub idle_delay_ms: Option<u64>,

    /// PostgreSQL host
    #[arg(long, env = "DB_HOST", value_name = "HOST")]
    pub db_host: Option<String>,

    /// PostgreSQL port
    #[arg(long, env = "DB_PORT", value_name = "PORT")]
    pub db_port: Option<u16>,

    /// PostgreSQL user
    #[arg(long, env = "DB_USERNAME", value_name = "USER")]
    pub db_username: Option<String>,

    /// PostgreSQL password
    #[arg(long, env = "DB_PASSWORD", value_name = "PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// PostgreSQL database name
    #[arg(long, env = "DB_DATABASE", value_name = "NAME")]
    pub db_database: Option<String>,

    /// Directory holding one downloaded repository per repo_id
    #[arg(long, env = "REPOSITORIES_DIR", value_name = "DIR")]
    pub repositories_dir: Option<PathBuf>,

    /// Language id sent with completion events
    #[arg(long, value_name = "ID")]
    pub language_id: Option<i64>,

    /// Analyze one repository and print its metrics as JSON
    ///
    /// Nothing is read from the queue, stored, or published.
    #[arg(long, value_name = "REPO_ID")]
    pub analyze: Option<String>,

    /// Generate a default .metrics-worker.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref repo_id) = self.analyze {
            if repo_id.trim().is_empty() {
                return Err("--analyze needs a non-empty repo id".to_string());
            }
        }

        if let Some(ref dir) = self.repositories_dir {
            if !dir.is_dir() {
                return Err(format!(
                    "Repositories directory does not exist: {}",
                    dir.display()
                ));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_validation_conflicting_options() {
        let args = Args {
            verbose: true,
            quiet: true,
            ..Args::default()
        };
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_missing_repositories_dir() {
        let args = Args {
            repositories_dir: Some(PathBuf::from("/definitely/not/a/dir")),
            ..Args::default()
        };
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = Args::default();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "metrics-worker",
            "--rmq-host",
            "rabbit",
            "--db-port",
            "6543",
            "--queue",
            "analyze-go",
            "--analyze",
            "abc123",
        ])
        .unwrap();

        assert_eq!(args.rmq_host.as_deref(), Some("rabbit"));
        assert_eq!(args.db_port, Some(6543));
        assert_eq!(args.analyze.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_merge_only_overrides_provided_values() {
        let args = Args {
            rmq_host: Some("rabbit".to_string()),
            db_password: Some("secret".to_string()),
            language_id: Some(5),
            ..Args::default()
        };

        let mut config = Config::default();
        config.merge_with_args(&args);

        assert_eq!(config.broker.host, "rabbit");
        assert_eq!(config.broker.port, 5672);
        assert_eq!(config.broker.queue, "analyze-ruby");
        assert_eq!(config.database.password.as_deref(), Some("secret"));
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.worker.language_id, 5);
    }
}
