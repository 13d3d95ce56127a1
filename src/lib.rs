//! tern: ships matching log lines to a Discord-compatible webhook.
//!
//! This crate handles:
//! - Following a growing log file across rotation and truncation
//! - Selecting lines with a regex and extracting named captures
//! - Suppressing repeats with a persistent Bloom-filter dedup store
//! - Delivering matches through a bounded, rate-limit-aware queue

pub mod app;
pub mod config;
pub mod dedup;
pub mod error;
pub mod matcher;
pub mod pipeline;
pub mod source;
pub mod webhook;

// Re-export main types
pub use config::{CliArgs, Config};
pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineStats};
pub use webhook::{DeliveryStats, Notifier, WebhookMessage};
