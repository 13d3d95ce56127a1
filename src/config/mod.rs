//! Configuration for tern.
//!
//! Loads a single YAML file (pointed at by `--config`), interpolates
//! environment variables, applies per-field defaults, and validates the
//! result before any component is constructed.
//!
//! # Example
//!
//! ```yaml
//! source:
//!   path: /var/log/auth.log
//!   pattern: 'Accepted publickey for (?P<user>\w+) from (?P<addr>[\d.]+)'
//! webhook:
//!   url: ${WEBHOOK_URL}
//! dedup:
//!   mode: bloom
//!   path: /var/lib/tern/seen.bloom
//!   expected_items: 100000
//!   false_positive_rate: 0.001
//! ```

mod vars;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::error::{
    ConfigError, EmptyPatternSnafu, EmptyWebhookUrlSnafu, EnvInterpolationSnafu,
    FalsePositiveRateRangeSnafu, ReadFileSnafu, YamlParseSnafu, ZeroExpectedItemsSnafu,
    ZeroQueueCapacitySnafu,
};

pub use vars::{InterpolationResult, interpolate};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "tern", version, about = "Ship matching log lines to a webhook")]
pub struct CliArgs {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    pub config: PathBuf,
}

/// Configuration for the followed log file and the match pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path of the log file to follow.
    pub path: PathBuf,
    /// Regular expression selecting lines to ship. Named capture groups
    /// become message fields.
    pub pattern: String,
    /// Label identifying this host in outbound messages.
    #[serde(default = "default_source_name")]
    pub source_name: String,
    /// How often to re-check the file for new data, rotation, or
    /// truncation.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_source_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl SourceConfig {
    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Unit of the `retry_after` value in 429 responses.
///
/// The upstream API documents seconds, but observed values are far too
/// large to be seconds; see DESIGN.md.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryAfterUnit {
    #[default]
    Millis,
    Seconds,
}

impl RetryAfterUnit {
    /// Convert a raw `retry_after` value to a delay.
    pub fn to_duration(self, value: f64) -> Duration {
        let value = value.max(0.0);
        match self {
            RetryAfterUnit::Millis => Duration::from_millis(value as u64),
            RetryAfterUnit::Seconds => Duration::from_secs_f64(value),
        }
    }
}

/// Configuration for the outbound webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Endpoint URL messages are POSTed to.
    pub url: String,
    /// Capacity of the in-memory delivery queue. Enqueueing blocks once
    /// this many messages are pending.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Request timeout for a single delivery attempt.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How to interpret the `retry_after` value in 429 responses.
    #[serde(default)]
    pub retry_after_unit: RetryAfterUnit,
    /// Delay to apply when a 429 response body cannot be parsed.
    #[serde(default = "default_fallback_retry_secs")]
    pub fallback_retry_secs: u64,
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_fallback_retry_secs() -> u64 {
    10
}

/// Deduplication mode, decided once at configuration time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DedupConfig {
    /// No deduplication; every match is delivered.
    #[default]
    Off,
    /// Bloom-filter deduplication backed by a file.
    Bloom {
        /// Path of the persisted filter.
        path: PathBuf,
        /// Expected number of distinct matches over the filter lifetime.
        #[serde(default = "default_expected_items")]
        expected_items: usize,
        /// Target false-positive probability at design capacity.
        #[serde(default = "default_false_positive_rate")]
        false_positive_rate: f64,
    },
}

fn default_expected_items() -> usize {
    100_000
}

fn default_false_positive_rate() -> f64 {
    0.001
}

/// Metrics configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Listen address for the Prometheus exporter (e.g. "127.0.0.1:9598").
    /// Absent means metrics are recorded but not exported.
    pub address: Option<String>,
}

/// Main configuration for tern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Followed file and match pattern.
    pub source: SourceConfig,
    /// Outbound webhook and delivery queue.
    pub webhook: WebhookConfig,
    /// Deduplication mode.
    #[serde(default)]
    pub dedup: DedupConfig,
    /// Metrics exporter.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let interpolated = interpolate(contents);
        ensure!(
            interpolated.is_ok(),
            EnvInterpolationSnafu {
                message: interpolated.errors.join("\n"),
            }
        );

        let config: Config = serde_yaml::from_str(&interpolated.text).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.webhook.url.is_empty(), EmptyWebhookUrlSnafu);
        ensure!(!self.source.pattern.is_empty(), EmptyPatternSnafu);
        ensure!(self.webhook.queue_capacity > 0, ZeroQueueCapacitySnafu);

        if let DedupConfig::Bloom {
            expected_items,
            false_positive_rate,
            ..
        } = &self.dedup
        {
            ensure!(*expected_items > 0, ZeroExpectedItemsSnafu);
            ensure!(
                *false_positive_rate > 0.0 && *false_positive_rate < 1.0,
                FalsePositiveRateRangeSnafu {
                    rate: *false_positive_rate,
                }
            );
        }

        Ok(())
    }
}
