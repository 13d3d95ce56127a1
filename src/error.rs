//! Error types for tern.
//!
//! Errors are grouped per subsystem and rolled up into [`PipelineError`]
//! for the application entry point. Construction-time failures are the
//! only fatal ones; everything encountered while processing lines is
//! logged and skipped.

use std::path::PathBuf;

use snafu::prelude::*;

/// Errors that can occur while loading and validating configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Webhook URL is empty.
    #[snafu(display("Webhook URL cannot be empty"))]
    EmptyWebhookUrl,

    /// Match pattern is empty.
    #[snafu(display("Match pattern cannot be empty"))]
    EmptyPattern,

    /// Match pattern failed to compile.
    #[snafu(display("Invalid match pattern: {source}"))]
    PatternSyntax { source: regex::Error },

    /// Delivery queue capacity must be non-zero.
    #[snafu(display("Delivery queue capacity must be greater than zero"))]
    ZeroQueueCapacity,

    /// Dedup capacity hint must be non-zero.
    #[snafu(display("Dedup expected_items must be greater than zero"))]
    ZeroExpectedItems,

    /// Dedup false-positive rate out of range.
    #[snafu(display("Dedup false_positive_rate must be between 0 and 1, got {rate}"))]
    FalsePositiveRateRange { rate: f64 },
}

/// Errors that can occur in the deduplication store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DedupError {
    /// Failed to open or read the store file for a reason other than
    /// absence or corruption (both of which are recovered in place).
    #[snafu(display("Could not open dedup store {}: {source}", path.display()))]
    OpenStore {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Filter sizing parameters were rejected.
    #[snafu(display("Could not size dedup filter: {message}"))]
    FilterSize { message: String },

    /// Failed to write the temporary store file.
    #[snafu(display("Could not write dedup store {}: {source}", path.display()))]
    WriteStore {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to rename the temporary file onto the canonical path.
    #[snafu(display("Could not replace dedup store {}: {source}", path.display()))]
    ReplaceStore {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors that can occur setting up or feeding the delivery queue.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DeliveryError {
    /// Failed to build the HTTP client.
    #[snafu(display("Failed to build HTTP client: {source}"))]
    ClientBuild { source: reqwest::Error },

    /// The delivery queue is closed and accepts no further messages.
    #[snafu(display("Delivery queue is closed"))]
    QueueClosed,
}

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to parse the configured listen address.
    #[snafu(display("Failed to parse metrics address: {source}"))]
    AddressParse { source: std::net::AddrParseError },

    /// Failed to initialize the Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

/// Top-level pipeline errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Dedup store error.
    #[snafu(display("Dedup store error: {source}"))]
    Dedup { source: DedupError },

    /// Delivery setup error.
    #[snafu(display("Delivery error: {source}"))]
    Delivery { source: DeliveryError },

    /// Metrics error.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<DedupError> for PipelineError {
    fn from(source: DedupError) -> Self {
        PipelineError::Dedup { source }
    }
}

impl From<DeliveryError> for PipelineError {
    fn from(source: DeliveryError) -> Self {
        PipelineError::Delivery { source }
    }
}

impl From<MetricsError> for PipelineError {
    fn from(source: MetricsError) -> Self {
        PipelineError::Metrics { source }
    }
}
