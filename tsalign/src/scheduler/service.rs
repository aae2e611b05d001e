//! The streaming scheduler.
//!
//! One control loop polls the input collection, turns newly ready tilt series
//! into step chains on the [`StepExecutor`] and, once the stream is closed and
//! every input id has been scheduled, submits a finalize step that closes the
//! output collections.

use async_trait::async_trait;
use itertools::Itertools;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::state::SharedState;
use crate::align::Aligner;
use crate::collection::{InputCollection, OutputStore, run_blocking};
use crate::domain::ItemState;
use crate::output::{OutputKind, OutputRouter};
use crate::pipeline::{
    ExecutionStats, ItemPipeline, PipelineConfig, Stage, StepExecutor, StepKey, StepRunner,
    item_steps,
};
use crate::{Error, Result};

/// Default poll interval (10 seconds).
const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;

/// Default number of steps running at once.
const DEFAULT_MAX_WORKERS: usize = 4;

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Pause between polls of the input collection, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum concurrent steps.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// What a completed run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Polls of the input collection.
    pub iterations: u64,
    /// Ids found in existing output collections and skipped.
    pub resumed: usize,
    /// Ids scheduled by this run.
    pub scheduled: Vec<String>,
    pub emitted: Vec<String>,
    pub failed: Vec<String>,
    /// Aligned without error but left no transform stack; emitted nowhere.
    pub artifact_missing: Vec<String>,
    pub steps: ExecutionStats,
    pub closed_collections: Vec<OutputKind>,
    pub duration_secs: f64,
}

/// Dispatches executor steps to the item pipeline and the router.
struct StepDispatcher {
    pipeline: Arc<ItemPipeline>,
    router: Arc<OutputRouter>,
    closed: Mutex<Option<Vec<OutputKind>>>,
}

#[async_trait]
impl StepRunner for StepDispatcher {
    async fn run(&self, step: &StepKey) -> Result<()> {
        let Some(item_id) = step.item_id.as_deref() else {
            return match step.stage {
                Stage::Finalize => self.finalize().await,
                stage => Err(Error::Graph(format!("{stage} step has no item"))),
            };
        };

        match step.stage {
            Stage::Prepare => self.pipeline.prepare(item_id).await,
            Stage::Align => self.pipeline.align(item_id).await,
            Stage::Materialize => self.pipeline.materialize(item_id).await,
            Stage::Finalize => Err(Error::Graph(format!("finalize step bound to {item_id}"))),
        }
    }
}

impl StepDispatcher {
    async fn finalize(&self) -> Result<()> {
        let router = self.router.clone();
        let closed = run_blocking(move || router.close_all()).await?;
        info!(collections = ?closed, "Output collections closed");
        *self.closed.lock() = Some(closed);
        Ok(())
    }
}

/// Watches a growing input collection and aligns every tilt series in it.
pub struct StreamingScheduler {
    config: SchedulerConfig,
    shared: Arc<SharedState>,
    store: Arc<dyn OutputStore>,
    router: Arc<OutputRouter>,
    pipeline: Arc<ItemPipeline>,
}

impl StreamingScheduler {
    pub fn new(
        config: SchedulerConfig,
        pipeline_config: PipelineConfig,
        input: Box<dyn InputCollection>,
        store: Arc<dyn OutputStore>,
        aligner: Arc<dyn Aligner>,
    ) -> Self {
        let shared = Arc::new(SharedState::new(input));
        let router = Arc::new(OutputRouter::new(store.clone(), shared.metadata()));
        let pipeline = Arc::new(ItemPipeline::new(
            shared.clone(),
            aligner,
            router.clone(),
            pipeline_config,
        ));
        Self {
            config,
            shared,
            store,
            router,
            pipeline,
        }
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn router(&self) -> &Arc<OutputRouter> {
        &self.router
    }

    /// Run until the input stream is closed and every item has reached a
    /// terminal state.
    ///
    /// Returns [`Error::StalledStream`] when the stream is closed but its ids
    /// can never all be scheduled. In-flight work is drained first and the
    /// output collections are left open.
    pub async fn run(&self) -> Result<RunSummary> {
        let start = Instant::now();
        let resumed = self.resume().await?;

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_workers = self.config.max_workers,
            resumed,
            "Streaming scheduler started"
        );

        let executor = Arc::new(StepExecutor::new(self.config.max_workers));
        let dispatcher = Arc::new(StepDispatcher {
            pipeline: self.pipeline.clone(),
            router: self.router.clone(),
            closed: Mutex::new(None),
        });
        let execution = {
            let executor = executor.clone();
            let runner: Arc<dyn StepRunner> = dispatcher.clone();
            tokio::spawn(async move { executor.run(runner).await })
        };

        let mut iterations = 0;
        let outcome = self.schedule(&executor, &mut iterations).await;

        executor.seal();
        let steps = execution
            .await
            .map_err(|e| Error::Other(format!("step executor panicked: {e}")))?;
        outcome?;

        let processed = self.shared.processed();
        let summary = RunSummary {
            iterations,
            resumed,
            scheduled: processed.into_iter().skip(resumed).collect(),
            emitted: self.shared.ids_in_state(ItemState::Emitted),
            failed: self.shared.failed(),
            artifact_missing: self.shared.ids_in_state(ItemState::ArtifactMissing),
            steps,
            closed_collections: dispatcher.closed.lock().take().unwrap_or_default(),
            duration_secs: start.elapsed().as_secs_f64(),
        };

        info!(
            scheduled = summary.scheduled.len(),
            emitted = summary.emitted.len(),
            failed = summary.failed.len(),
            artifact_missing = summary.artifact_missing.len(),
            duration_secs = summary.duration_secs,
            "Streaming scheduler finished"
        );
        Ok(summary)
    }

    /// Seed the processed set from the output collections of an earlier run.
    ///
    /// Failure is terminal, so failed ids are not retried either.
    async fn resume(&self) -> Result<usize> {
        let store = self.store.clone();
        let (aligned, failed) = run_blocking(move || {
            Ok((
                store.existing_ids(OutputKind::Aligned)?,
                store.existing_ids(OutputKind::Failed)?,
            ))
        })
        .await?;
        if aligned.is_empty() && failed.is_empty() {
            info!("No tilt series have been processed yet");
            return Ok(0);
        }
        info!(
            aligned = aligned.len(),
            failed = failed.len(),
            "Tilt series already processed"
        );
        let ids = aligned.into_iter().chain(failed).unique();
        Ok(self.shared.seed_processed(ids))
    }

    async fn schedule(&self, executor: &StepExecutor, iterations: &mut u64) -> Result<()> {
        let mut terminal_steps: Vec<StepKey> = Vec::new();
        let poll_interval = self.config.poll_interval();

        loop {
            *iterations += 1;
            let plan = self.shared.plan_iteration();

            for item in &plan.newly_ready {
                for (step, prerequisite) in item_steps(&item.item_id) {
                    let prerequisites: Vec<StepKey> = prerequisite.into_iter().collect();
                    executor.submit(step, &prerequisites)?;
                }
                terminal_steps.push(StepKey::item(&item.item_id, Stage::Materialize));
                info!(item_id = %item.item_id, size = item.size(), "Steps created");
            }

            if plan.complete {
                info!(items = terminal_steps.len(), "Input stream closed");
                executor.submit(StepKey::finalize(), &terminal_steps)?;
                return Ok(());
            }

            if !plan.stream_open && plan.newly_ready.is_empty() {
                error!(
                    missing = ?plan.discrepancy.missing,
                    unexpected = ?plan.discrepancy.unexpected,
                    "Input stream closed but its ids can never all be scheduled"
                );
                return Err(Error::StalledStream {
                    missing: plan.discrepancy.missing,
                    unexpected: plan.discrepancy.unexpected,
                });
            }

            debug!(
                iteration = *iterations,
                waiting = plan.waiting,
                stream_open = plan.stream_open,
                "Waiting for more input"
            );
            tokio::time::sleep(poll_interval).await;

            if plan.stream_open {
                let shared = self.shared.clone();
                if let Err(e) = run_blocking(move || shared.refresh()).await {
                    warn!(error = %e, "Failed to refresh input collection");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.max_workers, 4);

        let config: SchedulerConfig = serde_json::from_str(r#"{ "max_workers": 1 }"#).unwrap();
        assert_eq!(config.poll_interval_ms, 10_000);
        assert_eq!(config.max_workers, 1);
    }
}
