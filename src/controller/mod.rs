//! Controller
//!
//! Feeds watch events through the dependency index into the work queue and
//! runs a bounded pool of workers, each taking one key at a time through a
//! deadline-bounded reconciliation pass.

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::accessor::{Accessor, ListFilter};
use crate::models::ObjectKey;
use crate::queue::{RetryPolicy, WorkQueue};
use crate::reconciler::{Action, HelmChartReconciler, ReconcileError};
use crate::watcher::{Propagator, WatchEvent, route};

/// Worker pool settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Number of passes running at the same time
    pub workers: usize,
    /// Deadline for a single pass
    pub reconcile_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            reconcile_timeout: Duration::from_secs(300),
        }
    }
}

/// Run one pass, aborting it when the deadline expires.
///
/// An aborted pass drops its workspace and any artifact lock it holds.
pub async fn reconcile_with_deadline(
    reconciler: &HelmChartReconciler,
    key: &ObjectKey,
    timeout: Duration,
) -> Result<Action, ReconcileError> {
    match tokio::time::timeout(timeout, reconciler.reconcile(key)).await {
        Ok(result) => result,
        Err(_) => Err(ReconcileError::Timeout(timeout)),
    }
}

/// Schedule the next pass for `key` according to the outcome of the last one
pub fn handle_outcome(
    queue: &Arc<WorkQueue>,
    key: &ObjectKey,
    outcome: Result<Action, ReconcileError>,
) {
    match outcome {
        Ok(Action::Requeue) => queue.add(key.clone()),
        Ok(Action::RequeueAfter(delay)) => {
            queue.forget(key);
            queue.add_after(key.clone(), delay);
        }
        Ok(Action::Done) => queue.forget(key),
        Err(err) => {
            let delay = queue.add_rate_limited(key.clone());
            if err.is_conflict() {
                tracing::info!(
                    chart = %key,
                    retry_in = ?delay,
                    "Object changed during reconciliation"
                );
            } else {
                tracing::error!(
                    chart = %key,
                    error = %err,
                    retry_in = ?delay,
                    "Reconciliation failed"
                );
            }
        }
    }
}

/// Drives every watched HelmChart through the reconciler
pub struct Controller {
    reconciler: Arc<HelmChartReconciler>,
    propagator: Arc<Propagator>,
    queue: Arc<WorkQueue>,
    options: ControllerOptions,
}

impl Controller {
    pub fn new(
        reconciler: Arc<HelmChartReconciler>,
        propagator: Arc<Propagator>,
        retry: RetryPolicy,
        options: ControllerOptions,
    ) -> Self {
        Self {
            reconciler,
            propagator,
            queue: Arc::new(WorkQueue::new(retry)),
            options,
        }
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Index and enqueue every HelmChart the accessor lists
    pub async fn resync(&self, accessor: &dyn Accessor, namespace: Option<&str>) -> Result<usize> {
        let filter = ListFilter {
            namespace: namespace.map(str::to_string),
            source_index: None,
        };
        let charts = accessor
            .list(&filter)
            .await
            .context("Failed to list HelmCharts")?;
        for chart in &charts {
            self.propagator.chart_applied(chart);
            self.queue.add(chart.key());
        }
        tracing::debug!(charts = charts.len(), "Resynced HelmCharts");
        Ok(charts.len())
    }

    /// Start the worker pool
    pub fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        (0..self.options.workers.max(1))
            .map(|id| {
                let reconciler = Arc::clone(&self.reconciler);
                let queue = Arc::clone(&self.queue);
                let timeout = self.options.reconcile_timeout;
                tokio::spawn(async move {
                    while let Some(key) = queue.get().await {
                        tracing::debug!(worker = id, chart = %key, "Reconciling");
                        let outcome = reconcile_with_deadline(&reconciler, &key, timeout).await;
                        handle_outcome(&queue, &key, outcome);
                        queue.done(&key);
                    }
                    tracing::debug!(worker = id, "Worker stopped");
                })
            })
            .collect()
    }

    /// Route watch events into the queue until `shutdown` resolves or the
    /// watchers go away, then drain the workers
    pub async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<WatchEvent>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let workers = self.spawn_workers();
        tracing::info!(workers = workers.len(), "Controller started");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        for key in route(&self.propagator, event) {
                            self.queue.add(key);
                        }
                    }
                    None => {
                        tracing::warn!("Watch event channel closed");
                        break;
                    }
                },
                _ = &mut shutdown => {
                    tracing::info!("Shutting down controller");
                    break;
                }
            }
        }

        self.queue.shutdown();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::AccessorError;

    fn key() -> ObjectKey {
        ObjectKey::new("default", "podinfo")
    }

    #[tokio::test]
    async fn test_error_backs_off_and_success_forgets() {
        let queue = Arc::new(WorkQueue::new(RetryPolicy {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(600),
        }));

        handle_outcome(&queue, &key(), Err(ReconcileError::Timeout(Duration::from_secs(1))));
        handle_outcome(
            &queue,
            &key(),
            Err(ReconcileError::Patch(AccessorError::Api("unavailable".to_string()))),
        );
        assert_eq!(queue.failures(&key()), 2);
        assert!(queue.is_empty());

        handle_outcome(&queue, &key(), Ok(Action::RequeueAfter(Duration::from_secs(60))));
        assert_eq!(queue.failures(&key()), 0);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_requeue_is_immediate() {
        let queue = Arc::new(WorkQueue::default());
        handle_outcome(&queue, &key(), Ok(Action::Requeue));
        assert_eq!(queue.len(), 1);

        handle_outcome(&queue, &key(), Ok(Action::Done));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.failures(&key()), 0);
    }
}
