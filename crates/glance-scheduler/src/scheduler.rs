use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use glance_runtime::{ExecutionOutcome, ScriptExecutor};
use glance_secret::SecretCodec;
use glance_store::{Backend, InstanceStateStore};
use glance_widget::WidgetInstance;

use crate::config::SchedulerConfig;
use crate::cycle;
use crate::error::SchedulerError;

/// One scheduled instance: its cycle task and the token that stops it.
struct TaskHandle {
  cancel: CancellationToken,
  join: JoinHandle<()>,
  grid_id: String,
}

pub(crate) struct Inner {
  pub(crate) config: SchedulerConfig,
  pub(crate) executor: Arc<dyn ScriptExecutor>,
  pub(crate) backend: Arc<dyn Backend>,
  pub(crate) store: Arc<InstanceStateStore>,
  pub(crate) codec: SecretCodec,
  pub(crate) workers: Arc<Semaphore>,
  tasks: Mutex<HashMap<String, TaskHandle>>,
  shutdown: CancellationToken,
}

/// Schedules widget instances and owns their lifecycle.
///
/// Cheap to clone; all clones share the same registry, worker pool and state
/// store.
#[derive(Clone)]
pub struct Scheduler {
  inner: Arc<Inner>,
}

impl Scheduler {
  pub fn new(
    config: SchedulerConfig,
    executor: Arc<dyn ScriptExecutor>,
    backend: Arc<dyn Backend>,
    codec: SecretCodec,
  ) -> Self {
    let workers = Arc::new(Semaphore::new(config.max_workers));
    Self {
      inner: Arc::new(Inner {
        config,
        executor,
        backend,
        store: Arc::new(InstanceStateStore::new()),
        codec,
        workers,
        tasks: Mutex::new(HashMap::new()),
        shutdown: CancellationToken::new(),
      }),
    }
  }

  /// The shared state store, for API rendering.
  pub fn store(&self) -> Arc<InstanceStateStore> {
    self.inner.store.clone()
  }

  /// Start the refresh cycle for an instance, after `initial_delay`. An
  /// existing task for the same instance is cancelled and awaited first:
  /// exactly one live task per instance is an invariant, never a best effort.
  #[instrument(skip(self, instance, initial_delay), fields(instance_id = %instance.instance_id))]
  pub async fn schedule(
    &self,
    instance: WidgetInstance,
    initial_delay: Duration,
  ) -> Result<(), SchedulerError> {
    // The registry lock is held across the replacement so no second caller
    // can observe a window with two handles. Cycle tasks never take it.
    let mut tasks = self.inner.tasks.lock().await;

    if let Some(existing) = tasks.remove(&instance.instance_id) {
      debug!(live = !existing.join.is_finished(), "replacing existing task");
      self.stop_task(&instance.instance_id, existing).await?;
    }

    let instance_id = instance.instance_id.clone();
    let grid_id = instance.grid_id.clone();
    let cancel = self.inner.shutdown.child_token();
    let join = tokio::spawn(cycle::run(
      self.inner.clone(),
      instance,
      cancel.clone(),
      initial_delay,
    ));

    tasks.insert(
      instance_id.clone(),
      TaskHandle {
        cancel,
        join,
        grid_id,
      },
    );
    info!(instance_id, "scheduled");
    Ok(())
  }

  /// Stop an instance's cycle, waiting for any in-flight execution to unwind.
  /// Returns `Ok(false)` when nothing was scheduled; cancelling twice is fine.
  /// The instance state ends `Stopped` either way, its payload untouched.
  #[instrument(skip(self))]
  pub async fn cancel_instance(&self, instance_id: &str) -> Result<bool, SchedulerError> {
    let handle = self.inner.tasks.lock().await.remove(instance_id);
    let Some(handle) = handle else {
      debug!("not scheduled, nothing to cancel");
      self.inner.store.reset(instance_id);
      return Ok(false);
    };

    self.stop_task(instance_id, handle).await?;
    Ok(true)
  }

  /// Cancel every scheduled instance belonging to a grid. Returns how many
  /// tasks were stopped.
  #[instrument(skip(self))]
  pub async fn cancel_grid(&self, grid_id: &str) -> Result<usize, SchedulerError> {
    let handles: Vec<(String, TaskHandle)> = {
      let mut tasks = self.inner.tasks.lock().await;
      let ids: Vec<String> = tasks
        .iter()
        .filter(|(_, handle)| handle.grid_id == grid_id)
        .map(|(id, _)| id.clone())
        .collect();
      ids
        .into_iter()
        .filter_map(|id| tasks.remove(&id).map(|handle| (id, handle)))
        .collect()
    };

    let stopped = handles.len();
    let results = future::join_all(
      handles
        .into_iter()
        .map(|(instance_id, handle)| async move { self.stop_task(&instance_id, handle).await }),
    )
    .await;
    for result in results {
      result?;
    }
    info!(grid_id, stopped, "grid cancelled");
    Ok(stopped)
  }

  /// Stop everything. Used at process shutdown.
  pub async fn shutdown(&self) -> Result<(), SchedulerError> {
    self.inner.shutdown.cancel();
    let handles: Vec<(String, TaskHandle)> =
      self.inner.tasks.lock().await.drain().collect();
    for (instance_id, handle) in handles {
      self.stop_task(&instance_id, handle).await?;
    }
    Ok(())
  }

  /// Whether an instance currently has a live cycle task.
  pub async fn is_scheduled(&self, instance_id: &str) -> bool {
    self
      .inner
      .tasks
      .lock()
      .await
      .get(instance_id)
      .is_some_and(|handle| !handle.join.is_finished())
  }

  /// Number of live cycle tasks.
  pub async fn scheduled_count(&self) -> usize {
    self
      .inner
      .tasks
      .lock()
      .await
      .values()
      .filter(|handle| !handle.join.is_finished())
      .count()
  }

  /// Execute one instance a single time. Serialized through the registry: an
  /// existing task for the instance is cancelled and awaited first, and the
  /// registry stays locked for the invocation so no task can start alongside
  /// it. A success is recorded as terminal (`Stopped`) since no cycle follows.
  #[instrument(skip(self, instance), fields(instance_id = %instance.instance_id))]
  pub async fn run_once(
    &self,
    instance: &WidgetInstance,
  ) -> Result<ExecutionOutcome, SchedulerError> {
    let mut tasks = self.inner.tasks.lock().await;
    if let Some(existing) = tasks.remove(&instance.instance_id) {
      debug!(live = !existing.join.is_finished(), "replacing existing task");
      self.stop_task(&instance.instance_id, existing).await?;
    }

    let cancel = self.inner.shutdown.child_token();
    let step = cycle::invoke(&self.inner, instance, &cancel, true).await;
    Ok(step.outcome)
  }

  async fn stop_task(
    &self,
    instance_id: &str,
    handle: TaskHandle,
  ) -> Result<(), SchedulerError> {
    handle.cancel.cancel();

    let started = Instant::now();
    let mut join = handle.join;
    let waited = tokio::time::timeout(self.inner.config.cancel_grace, &mut join).await;
    self.inner.store.reset(instance_id);

    match waited {
      Ok(_) => {
        info!(instance_id, "stopped");
        Ok(())
      }
      Err(_) => {
        error!(instance_id, "task did not unwind in time, aborting");
        join.abort();
        Err(SchedulerError::CancelTimeout {
          instance_id: instance_id.to_string(),
          waited_ms: started.elapsed().as_millis(),
        })
      }
    }
  }
}
