//! Run loop — the sole driver of time.
//!
//! Each iteration: backend health check, bounded fetch of unprocessed
//! messages, sequential processing through the orchestrator, aggregate
//! counts. Iteration-level failures (health, fetch) abort only that
//! iteration; the loop sleeps and tries again. An interrupt is honored
//! only between iterations, so an in-flight message always reaches a
//! terminal abort or commit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::HARD_MESSAGE_CAP;
use crate::error::IterationError;
use crate::mailbox::Mailbox;
use crate::backend::Backend;
use crate::pipeline::orchestrator::Orchestrator;

/// Run loop configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub poll_interval: Duration,
    pub max_messages_per_poll: usize,
    pub max_iterations: u32,
    pub inbox_label: String,
    pub processed_label: String,
}

impl RunConfig {
    /// Filter selecting unprocessed inbox messages.
    pub fn fetch_filter(&self) -> String {
        format!("label:{} -label:{}", self.inbox_label, self.processed_label)
    }
}

/// Counts for one iteration (or an aggregated run).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl RunStats {
    fn absorb(&mut self, other: RunStats) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

/// The polling loop feeding messages to the orchestrator one at a time.
pub struct RunLoop {
    mailbox: Arc<dyn Mailbox>,
    backend: Arc<dyn Backend>,
    orchestrator: Orchestrator,
    config: RunConfig,
    shutdown: Arc<AtomicBool>,
}

impl RunLoop {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        backend: Arc<dyn Backend>,
        orchestrator: Orchestrator,
        config: RunConfig,
    ) -> Self {
        Self {
            mailbox,
            backend,
            orchestrator,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between iterations; set it to stop the loop after the
    /// current iteration finishes its in-flight item.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// One polling pass: health check, fetch, process each message
    /// sequentially. Item failures are absorbed into the stats; only
    /// run-level failures (health, fetch) error out, and an auth failure
    /// mid-batch cuts the batch short.
    pub async fn run_once(&self) -> Result<RunStats, IterationError> {
        let run_id = Uuid::new_v4();

        if !self.backend.health_check().await {
            return Err(IterationError::Unhealthy);
        }

        // The cap holds even if the gateway ignores maxResults.
        let limit = self.config.max_messages_per_poll.min(HARD_MESSAGE_CAP);
        let filter = self.config.fetch_filter();
        let mut messages = self.mailbox.query(&filter, limit).await?;
        if messages.len() > limit {
            warn!(
                run_id = %run_id,
                returned = messages.len(),
                limit,
                "Gateway exceeded the requested batch size; truncating"
            );
            messages.truncate(limit);
        }

        if messages.is_empty() {
            info!(run_id = %run_id, "No unprocessed messages");
            return Ok(RunStats::default());
        }
        info!(run_id = %run_id, count = messages.len(), "Fetched unprocessed messages");

        let mut stats = RunStats::default();
        for message in &messages {
            let outcome = self.orchestrator.process(message).await;
            stats.attempted += 1;
            if outcome.succeeded() {
                stats.succeeded += 1;
                continue;
            }
            stats.failed += 1;

            if let Some(failure) = &outcome.failure
                && failure.error.is_auth()
            {
                // One re-login already happened inside the backend client.
                // A credential that still fails will fail for every
                // remaining item too — stop the batch, retry next poll.
                error!(
                    run_id = %run_id,
                    id = %message.id,
                    "Authentication failing; aborting remainder of iteration"
                );
                break;
            }
        }

        info!(
            run_id = %run_id,
            attempted = stats.attempted,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "Iteration complete"
        );
        Ok(stats)
    }

    /// Poll up to `max_iterations` times, sleeping between iterations.
    /// Iteration-level errors are logged and never fatal; returns the
    /// aggregated stats.
    pub async fn run_continuous(&self) -> RunStats {
        let mut total = RunStats::default();

        for iteration in 1..=self.config.max_iterations {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Shutdown requested; stopping before iteration {iteration}");
                break;
            }

            info!(iteration, max = self.config.max_iterations, "Starting iteration");
            match self.run_once().await {
                Ok(stats) => total.absorb(stats),
                Err(e) => {
                    error!(iteration, error = %e, "Iteration aborted");
                }
            }

            if iteration < self.config.max_iterations {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        info!(
            attempted = total.attempted,
            succeeded = total.succeeded,
            failed = total.failed,
            "Run loop finished"
        );
        total
    }
}
