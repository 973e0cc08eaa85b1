use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use glance_runtime::{ExecutionOutcome, ExecutionRequest, FailureKind};
use glance_store::{EventKind, WidgetState};
use glance_widget::WidgetInstance;

use crate::scheduler::Inner;

/// Result of one pass through an instance's cycle: the recorded outcome and
/// when to run again. `next: None` ends the cycle.
pub(crate) struct CycleStep {
  pub(crate) outcome: ExecutionOutcome,
  pub(crate) next: Option<Duration>,
}

impl CycleStep {
  fn stop(outcome: ExecutionOutcome) -> Self {
    Self {
      outcome,
      next: None,
    }
  }
}

/// Drive one instance until it terminates or its token is cancelled. The task
/// never touches the scheduler registry; reaping finished handles is the
/// registry's own concern.
pub(crate) async fn run(
  inner: Arc<Inner>,
  instance: WidgetInstance,
  cancel: CancellationToken,
  initial_delay: Duration,
) {
  if !initial_delay.is_zero() {
    tokio::select! {
      _ = cancel.cancelled() => return,
      _ = tokio::time::sleep(initial_delay) => {}
    }
  }

  loop {
    let step = invoke(&inner, &instance, &cancel, false).await;
    if cancel.is_cancelled() || step.outcome.is_interrupted() {
      break;
    }
    let Some(delay) = step.next else {
      debug!(instance_id = %instance.instance_id, "cycle finished");
      break;
    };

    tokio::select! {
      _ = cancel.cancelled() => break,
      _ = tokio::time::sleep(delay) => {}
    }
  }
}

/// Execute one instance once: resolve its definition and configuration,
/// run the script under the worker pool and the deadline, record the result
/// and report it to the backend.
///
/// `single_run` records a success as terminal (`Stopped`) regardless of the
/// definition's cadence; used when no cycle task follows the invocation.
///
/// An interrupted run records nothing: no state transition, no persisted
/// result, no notification.
#[instrument(skip_all, fields(instance_id = %instance.instance_id))]
pub(crate) async fn invoke(
  inner: &Arc<Inner>,
  instance: &WidgetInstance,
  cancel: &CancellationToken,
  single_run: bool,
) -> CycleStep {
  // The worker slot is held for the invocation only, never across the sleep.
  let _permit = tokio::select! {
    _ = cancel.cancelled() => return CycleStep::stop(ExecutionOutcome::interrupted()),
    permit = inner.workers.acquire() => match permit {
      Ok(permit) => permit,
      Err(_) => return CycleStep::stop(ExecutionOutcome::interrupted()),
    },
  };

  let definition = match inner.backend.load_definition(&instance.widget_id).await {
    Ok(definition) => definition,
    Err(e) => {
      // Without a definition there is no cadence to retry on.
      let message = format!("cannot load widget '{}': {e}", instance.widget_id);
      return CycleStep::stop(record_fatal(inner, instance, &message).await);
    }
  };

  let reschedule = if definition.is_one_shot() {
    None
  } else {
    Some(Duration::from_secs(definition.delay_secs).max(inner.config.min_delay))
  };

  let (stored, specs) = match inner.backend.load_config(&instance.instance_id).await {
    Ok(loaded) => loaded,
    Err(e) => {
      let message = format!("cannot load configuration: {e}");
      return CycleStep {
        outcome: record_fatal(inner, instance, &message).await,
        next: reschedule,
      };
    }
  };

  // Secrets stay encrypted at rest; decrypt only for this invocation.
  let decrypted = match inner.codec.decrypt_config(&stored, &specs) {
    Ok(decrypted) => decrypted,
    Err(e) => {
      return CycleStep {
        outcome: record_fatal(inner, instance, &e.to_string()).await,
        next: reschedule,
      };
    }
  };

  let config = match definition.resolve_config(&decrypted) {
    Ok(config) => config,
    Err(e) => {
      return CycleStep {
        outcome: record_fatal(inner, instance, &e.to_string()).await,
        next: reschedule,
      };
    }
  };

  inner.store.mark_running(&instance.instance_id);

  let previous_payload = inner
    .store
    .snapshot(&instance.instance_id)
    .and_then(|snapshot| snapshot.last_payload);

  let deadline = if definition.timeout_secs > 0 {
    Duration::from_secs(definition.timeout_secs)
  } else {
    inner.config.max_run
  };

  let request = ExecutionRequest {
    instance_id: instance.instance_id.clone(),
    script: definition.script.clone(),
    config,
    previous_payload,
  };

  // The child token ties the script's lifetime to the cycle's: a cancel or a
  // deadline overrun both unwind the script at its next checkpoint.
  let exec_cancel = cancel.child_token();
  let outcome =
    match tokio::time::timeout(deadline, inner.executor.execute(request, exec_cancel.clone()))
      .await
    {
      Ok(outcome) => outcome,
      Err(_) => {
        exec_cancel.cancel();
        ExecutionOutcome::failure(
          FailureKind::Timeout,
          format!("execution exceeded {}s", deadline.as_secs()),
        )
      }
    };

  // A run that completed after its token was revoked counts as interrupted
  // too; a cancelled instance must never record or persist anything.
  if outcome.is_interrupted() || cancel.is_cancelled() {
    return CycleStep::stop(ExecutionOutcome::interrupted());
  }

  let now = Utc::now();
  match &outcome {
    ExecutionOutcome::Success {
      payload,
      log,
      next_run_in,
    } => {
      // A non-positive override stops the instance; a positive one replaces
      // the definition's delay for this tick only.
      let terminal =
        single_run || definition.is_one_shot() || next_run_in.is_some_and(|n| n <= 0);
      inner
        .store
        .apply_success(&instance.instance_id, payload, log, now, terminal);

      let state = if terminal {
        WidgetState::Stopped
      } else {
        WidgetState::Running
      };
      report(inner, instance, state, Some(payload), log, now).await;

      let next = if terminal {
        None
      } else {
        let secs = next_run_in
          .filter(|n| *n > 0)
          .map(|n| n as u64)
          .unwrap_or(definition.delay_secs);
        Some(Duration::from_secs(secs).max(inner.config.min_delay))
      };
      CycleStep { outcome, next }
    }
    ExecutionOutcome::Failure { log, kind } => {
      inner
        .store
        .apply_failure(&instance.instance_id, log, now, *kind);
      let state = match kind {
        FailureKind::Remote | FailureKind::Fatal => WidgetState::Error,
        _ => WidgetState::Warning,
      };
      report(inner, instance, state, None, log, now).await;
      CycleStep {
        outcome,
        next: reschedule,
      }
    }
  }
}

/// Record a failure that happened before the script could run at all.
async fn record_fatal(
  inner: &Arc<Inner>,
  instance: &WidgetInstance,
  message: &str,
) -> ExecutionOutcome {
  warn!(instance_id = %instance.instance_id, message, "execution aborted before the script ran");
  let now = Utc::now();
  inner
    .store
    .apply_failure(&instance.instance_id, message, now, FailureKind::Fatal);
  report(inner, instance, WidgetState::Error, None, message, now).await;
  ExecutionOutcome::failure(FailureKind::Fatal, message.to_string())
}

/// Persist the result and nudge the owning project's clients. Backend
/// failures are logged and otherwise ignored; the cycle keeps its cadence.
async fn report(
  inner: &Arc<Inner>,
  instance: &WidgetInstance,
  state: WidgetState,
  payload: Option<&str>,
  log: &str,
  executed_at: chrono::DateTime<Utc>,
) {
  if let Err(e) = inner
    .backend
    .persist_result(&instance.instance_id, state, payload, log, executed_at)
    .await
  {
    warn!(instance_id = %instance.instance_id, error = %e, "failed to persist result");
  }
  if let Err(e) = inner
    .backend
    .notify(&instance.project_token, EventKind::RefreshWidget)
    .await
  {
    warn!(instance_id = %instance.instance_id, error = %e, "failed to notify project");
  }
}
