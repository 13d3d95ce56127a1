//! The match-deduplicate-deliver pipeline.
//!
//! One driver task follows the log file and evaluates each line; one
//! delivery worker (owned by [`Notifier`]) drains the outbound queue.
//! Those two tasks and the queue between them are the whole concurrency
//! story.

use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dedup::Deduplicator;
use crate::matcher::{CapturedField, LineMatcher};
use crate::source::LogFollower;
use crate::webhook::{DeliveryStats, Embed, EmbedAuthor, EmbedField, Notifier, WebhookMessage};
use crate::error::PipelineError;

/// Counters kept by the pipeline driver, reported at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Lines consumed from the followed file.
    pub lines_read: u64,
    /// Lines that matched the pattern.
    pub matched: u64,
    /// Matches suppressed as duplicates.
    pub suppressed: u64,
    /// Matches handed to the delivery queue.
    pub enqueued: u64,
}

/// Drives lines from the follower through matching, dedup, and enqueue.
pub struct Pipeline {
    follower: LogFollower,
    matcher: LineMatcher,
    dedup: Deduplicator,
    notifier: Notifier,
    source_name: String,
    file_label: String,
    stats: PipelineStats,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("source_name", &self.source_name)
            .field("file_label", &self.file_label)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Build every component from configuration.
    ///
    /// Any failure here is fatal: the process must not start tailing
    /// lines with a missing deduplicator or an unusable delivery queue.
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let matcher = LineMatcher::new(&config.source.pattern)
            .map_err(|source| PipelineError::Config { source })?;
        let dedup = Deduplicator::from_config(&config.dedup)?;
        let notifier = Notifier::new(config.webhook.clone())?;
        let follower = LogFollower::new(config.source.path.clone(), config.source.poll_interval());

        Ok(Self {
            follower,
            matcher,
            dedup,
            notifier,
            source_name: config.source.source_name.clone(),
            file_label: config.source.path.display().to_string(),
            stats: PipelineStats::default(),
        })
    }

    /// Process lines until `shutdown` fires, then drain the delivery
    /// queue and return both sides' stats.
    pub async fn run(mut self, shutdown: CancellationToken) -> (PipelineStats, DeliveryStats) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("shutdown requested, draining delivery queue");
                    break;
                }

                line = self.follower.next_line() => {
                    self.process_line(&line).await;
                }
            }
        }

        let delivery = self.notifier.close().await;
        (self.stats, delivery)
    }

    /// Evaluate a single line: match, dedup, enqueue, mark seen.
    async fn process_line(&mut self, line: &str) {
        self.stats.lines_read += 1;

        let Some(captured) = self.matcher.captures(line) else {
            return;
        };
        self.stats.matched += 1;
        counter!("tern_lines_matched_total").increment(1);
        debug!(line, "matched");

        // The dedup key is the raw line, not the extracted fields: two
        // different lines with identical captures are distinct events.
        match self.dedup.exists(line.as_bytes()) {
            Ok(false) => {}
            Ok(true) => {
                self.stats.suppressed += 1;
                counter!("tern_duplicates_suppressed_total").increment(1);
                debug!(line, "suppressing duplicate");
                return;
            }
            Err(e) => {
                warn!(error = %e, "dedup check failed, skipping line");
                return;
            }
        }

        let message = self.build_message(line, captured);
        if let Err(e) = self.notifier.enqueue(message).await {
            warn!(error = %e, "could not enqueue message, dropping match");
            return;
        }
        self.stats.enqueued += 1;

        // Mark seen only after the message is safely queued: a crash in
        // between redelivers after restart rather than losing the event.
        if let Err(e) = self.dedup.add(line.as_bytes()).await {
            warn!(error = %e, "failed to persist dedup state");
        }
    }

    /// Render a matched line as a webhook message: the line itself in a
    /// code fence, the fixed identity fields, then one field per named
    /// capture in pattern order.
    fn build_message(&self, line: &str, captured: Vec<CapturedField>) -> WebhookMessage {
        let mut fields = Vec::with_capacity(captured.len() + 2);
        fields.push(EmbedField::new("source", &self.source_name));
        fields.push(EmbedField::new("file", &self.file_label));
        for capture in captured {
            fields.push(EmbedField::new(capture.name, capture.value));
        }

        WebhookMessage::embed(Embed {
            author: Some(EmbedAuthor {
                name: format!("{} on {}", self.file_label, self.source_name),
            }),
            description: Some(format!("```\n{line}\n```")),
            fields,
            ..Embed::default()
        })
    }
}
