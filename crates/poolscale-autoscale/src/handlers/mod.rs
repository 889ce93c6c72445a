//! One handler per [`ScaleState`](crate::ScaleState).
//!
//! Each handler inspects the platform, performs at most one step of work, and
//! either stays in its state or transitions. None of them wait: an unfinished
//! platform task means "return now, look again next invocation".

mod decommission;
mod monitor;
mod provision;
mod registrar;

use poolscale_platform::{Platform, Task, TaskKind};
use tracing::warn;

use crate::error::ScaleResult;
use crate::scaler::{Autoscaler, PoolRun};

impl<P: Platform> Autoscaler<P> {
    /// Fetch the pending task, insisting it is of kind `expected`.
    ///
    /// A missing task id, an unknown task, or a task of the wrong kind means
    /// the record points at something it shouldn't; the pool is sent back to
    /// `MonitorUsage` and an assertion error is returned.
    pub(crate) fn pending_task(&self, run: &mut PoolRun, expected: TaskKind) -> ScaleResult<Task> {
        let task = match &run.record.pending_task_id {
            Some(id) => self.platform.get_task(id)?,
            None => None,
        };
        match task {
            Some(task) if task.kind == expected => {
                if !task.failures.is_empty() {
                    let failures: Vec<String> = task
                        .failures
                        .iter()
                        .map(|f| format!("{}: {}", f.item, f.reason))
                        .collect();
                    warn!(task_id = %task.id, ?failures, "task reported failures");
                }
                Ok(task)
            }
            Some(task) => {
                let problem = format!(
                    "pending task {} is a {} task, expected {expected}",
                    task.id, task.kind
                );
                Err(self.fail_assertion(run, problem))
            }
            None => {
                let problem = format!(
                    "pending {expected} task {:?} not found",
                    run.record.pending_task_id
                );
                Err(self.fail_assertion(run, problem))
            }
        }
    }
}
