//! Dependency-honoring step executor.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::dag::{StepGraph, StepId, StepKey};
use crate::{Error, Result};

/// Runs a single step.
#[async_trait]
pub trait StepRunner: Send + Sync + 'static {
    async fn run(&self, step: &StepKey) -> Result<()>;
}

/// Counters reported when the executor drains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    pub completed: usize,
    /// Steps whose runner returned an error or panicked.
    pub failed: usize,
}

/// Runs steps on tokio tasks as their prerequisites complete.
///
/// Steps are submitted while [`StepExecutor::run`] is in progress. Once the
/// executor is sealed and every submitted step has completed, `run` returns.
pub struct StepExecutor {
    graph: Mutex<StepGraph>,
    semaphore: Arc<Semaphore>,
    max_workers: usize,
    notify: Notify,
    sealed: AtomicBool,
}

impl StepExecutor {
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            graph: Mutex::new(StepGraph::new()),
            semaphore: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            notify: Notify::new(),
            sealed: AtomicBool::new(false),
        }
    }

    /// Add a step to run after `prerequisites`.
    pub fn submit(&self, key: StepKey, prerequisites: &[StepKey]) -> Result<StepId> {
        if self.is_sealed() {
            return Err(Error::Graph(format!("executor sealed, cannot submit {key}")));
        }
        let id = self.graph.lock().insert(key, prerequisites)?;
        self.notify.notify_one();
        Ok(id)
    }

    /// No more steps will be submitted.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    pub fn is_drained(&self) -> bool {
        self.graph.lock().is_drained()
    }

    /// Drive steps through `runner` until sealed and drained.
    ///
    /// A step that fails is logged and still counts as completed, so its
    /// dependents run. Steps decide for themselves what an upstream failure means.
    pub async fn run(&self, runner: Arc<dyn StepRunner>) -> ExecutionStats {
        info!(max_workers = self.max_workers, "Step executor started");

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, (StepId, StepKey)> = HashMap::new();
        let mut stats = ExecutionStats::default();

        loop {
            // Read before taking ready steps: everything submitted before the
            // seal is then visible to `take_ready`.
            let sealed = self.is_sealed();
            let ready = self.graph.lock().take_ready();

            for (id, key) in ready {
                let runner = runner.clone();
                let semaphore = self.semaphore.clone();
                let step = key.clone();
                let handle = tasks.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| Error::Other(format!("worker semaphore closed: {e}")))?;
                    debug!(step = %step, "Running step");
                    runner.run(&step).await
                });
                running.insert(handle.id(), (id, key));
            }

            if tasks.is_empty() {
                if sealed {
                    let graph = self.graph.lock();
                    if !graph.is_drained() {
                        error!(steps = graph.len(), "Step graph stuck with no runnable steps");
                    }
                    break;
                }
                self.notify.notified().await;
                continue;
            }

            tokio::select! {
                Some(joined) = tasks.join_next_with_id() => {
                    let (task_id, outcome) = match joined {
                        Ok((task_id, result)) => (task_id, result.map_err(|e| e.to_string())),
                        Err(join_error) => (join_error.id(), Err(format!("step panicked: {join_error}"))),
                    };
                    let Some((id, key)) = running.remove(&task_id) else {
                        warn!("Finished task has no step");
                        continue;
                    };
                    match outcome {
                        Ok(()) => debug!(step = %key, "Step completed"),
                        Err(e) => {
                            error!(step = %key, error = %e, "Step failed");
                            stats.failed += 1;
                        }
                    }
                    stats.completed += 1;
                    if let Err(e) = self.graph.lock().complete(id) {
                        error!(step = %key, error = %e, "Failed to record step completion");
                    }
                }
                _ = self.notify.notified() => {}
            }
        }

        info!(
            completed = stats.completed,
            failed = stats.failed,
            "Step executor drained"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Stage;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        order: Mutex<Vec<String>>,
        active: AtomicUsize,
        peak: AtomicUsize,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl StepRunner for Recorder {
        async fn run(&self, step: &StepKey) -> Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.order.lock().push(step.to_string());
            if self.fail_on.as_deref() == Some(step.to_string().as_str()) {
                return Err(Error::external("ts1", "boom"));
            }
            Ok(())
        }
    }

    fn submit_chain(executor: &StepExecutor, id: &str) -> StepKey {
        let prepare = StepKey::item(id, Stage::Prepare);
        let align = StepKey::item(id, Stage::Align);
        let materialize = StepKey::item(id, Stage::Materialize);
        executor.submit(prepare.clone(), &[]).unwrap();
        executor.submit(align.clone(), &[prepare]).unwrap();
        executor.submit(materialize.clone(), &[align]).unwrap();
        materialize
    }

    fn position(order: &[String], step: &str) -> usize {
        order.iter().position(|s| s == step).unwrap()
    }

    #[tokio::test]
    async fn test_runs_steps_in_dependency_order() {
        let executor = Arc::new(StepExecutor::new(4));
        let recorder = Arc::new(Recorder::default());

        let run = {
            let executor = executor.clone();
            let runner: Arc<dyn StepRunner> = recorder.clone();
            tokio::spawn(async move { executor.run(runner).await })
        };

        let a = submit_chain(&executor, "a");
        tokio::time::sleep(Duration::from_millis(20)).await;
        let b = submit_chain(&executor, "b");
        executor.submit(StepKey::finalize(), &[a, b]).unwrap();
        executor.seal();

        let stats = run.await.unwrap();
        assert_eq!(stats, ExecutionStats { completed: 7, failed: 0 });
        assert!(executor.is_drained());

        let order = recorder.order.lock().clone();
        for id in ["a", "b"] {
            assert!(position(&order, &format!("{id}/prepare")) < position(&order, &format!("{id}/align")));
            assert!(position(&order, &format!("{id}/align")) < position(&order, &format!("{id}/materialize")));
        }
        assert_eq!(order.last().map(String::as_str), Some("finalize"));
    }

    #[tokio::test]
    async fn test_worker_limit() {
        let executor = Arc::new(StepExecutor::new(2));
        let recorder = Arc::new(Recorder::default());
        for id in ["a", "b", "c", "d", "e"] {
            executor.submit(StepKey::item(id, Stage::Prepare), &[]).unwrap();
        }
        executor.seal();

        let stats = executor.run(recorder.clone()).await;
        assert_eq!(stats.completed, 5);
        assert!(recorder.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failed_step_releases_dependents() {
        let executor = StepExecutor::new(1);
        let recorder = Arc::new(Recorder {
            fail_on: Some("ts1/align".to_string()),
            ..Default::default()
        });
        submit_chain(&executor, "ts1");
        executor.seal();

        let stats = executor.run(recorder.clone()).await;
        assert_eq!(stats, ExecutionStats { completed: 3, failed: 1 });
        assert_eq!(recorder.order.lock().last().map(String::as_str), Some("ts1/materialize"));
    }

    #[tokio::test]
    async fn test_sealed_executor_rejects_steps() {
        let executor = StepExecutor::new(1);
        executor.seal();
        assert!(executor.submit(StepKey::finalize(), &[]).is_err());
        let stats = executor.run(Arc::new(Recorder::default())).await;
        assert_eq!(stats, ExecutionStats::default());
    }
}
