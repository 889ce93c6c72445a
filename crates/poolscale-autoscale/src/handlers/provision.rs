//! ProvisionMachines and MonitorProvision: grow the pool.

use poolscale_platform::{Platform, TaskKind};
use tracing::{debug, error, info, warn};

use crate::error::ScaleResult;
use crate::load::LoadSample;
use crate::scaler::{Autoscaler, PoolRun};
use crate::state::ScaleState;

impl<P: Platform> Autoscaler<P> {
    /// Create identity accounts and start a VM creation task for them.
    pub(crate) fn provision_machines(&self, run: &mut PoolRun) -> ScaleResult<()> {
        let config = &run.record.config;
        let sample = LoadSample::read(&self.platform, &run.pool)?;
        let mut needed = sample.machines_needed(config.watermarks.high());

        if let Some(max) = config.max_machines {
            let owned = self.owned_machines(run)?.len() as i64;
            let headroom = i64::from(max) - owned;
            if needed > headroom {
                debug!(needed, headroom, max, "clamping to machine cap");
                needed = headroom;
            }
        }

        if needed <= 0 {
            info!(needed, "no machines needed");
            return self.transition(run, ScaleState::MonitorUsage);
        }
        let needed = u32::try_from(needed).unwrap_or(u32::MAX);

        let identity_pool_id = run.record.config.source.identity_pool_id.clone();
        let batch = self.platform.create_accounts(&identity_pool_id, needed)?;
        if !batch.failed.is_empty() {
            let failures: Vec<String> = batch
                .failed
                .iter()
                .map(|f| format!("{}: {}", f.name, f.reason))
                .collect();
            warn!(
                requested = needed,
                failed = batch.failed.len(),
                ?failures,
                "some identity accounts could not be created"
            );
        }
        if batch.succeeded.is_empty() {
            error!(requested = needed, "no identity accounts were created");
            return self.transition(run, ScaleState::MonitorUsage);
        }

        let accounts: Vec<String> = batch.succeeded.into_iter().map(|a| a.name).collect();
        let scheme_id = run.record.config.source.provisioning_scheme_id.clone();
        let task_id = self.platform.start_create_vms(&scheme_id, &accounts)?;
        info!(%task_id, machines = accounts.len(), "provisioning task started");

        run.record.pending_task_id = Some(task_id);
        run.record.actions_taken = accounts.len() as u32;
        self.transition(run, ScaleState::MonitorProvision)
    }

    /// Wait for the creation task; move on once it has produced machines.
    pub(crate) fn monitor_provision(&self, run: &mut PoolRun) -> ScaleResult<()> {
        let task = self.pending_task(run, TaskKind::Create)?;
        if task.active {
            debug!(task_id = %task.id, "provisioning task still running");
            return Ok(());
        }

        if task.items.is_empty() {
            error!(
                task_id = %task.id,
                requested = run.record.actions_taken,
                "provisioning task created no machines"
            );
            run.record.clear_pending();
            return self.transition(run, ScaleState::MonitorUsage);
        }

        info!(
            task_id = %task.id,
            created = task.items.len(),
            requested = run.record.actions_taken,
            "provisioning task complete"
        );
        self.transition(run, ScaleState::AddMachines)
    }
}
