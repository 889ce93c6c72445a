//! RemoveMachines and MonitorDeleteMachines: shrink the pool.
//!
//! Removal is a two-step mutation too. The idle owned machines picked for
//! removal are recorded first (`Checkpoint::Unassigning`). They then leave
//! the pool and the machine directory (recorded as `Checkpoint::Unassigned`),
//! and a VM deletion task is started for their hosts. Once the task is done
//! the machines' identity accounts are deleted.
//!
//! A re-entry with `Unassigning` replays the first step: a machine that is
//! already out of the pool or the directory counts as unassigned.

use std::collections::{BTreeMap, BTreeSet};

use poolscale_platform::{MachineQuery, Platform, PlatformError, TaskKind};
use tracing::{debug, error, info, warn};

use crate::error::ScaleResult;
use crate::metadata::Checkpoint;
use crate::scaler::{Autoscaler, PoolRun, epoch_secs};
use crate::state::ScaleState;

impl<P: Platform> Autoscaler<P> {
    pub(crate) fn remove_machines(&self, run: &mut PoolRun) -> ScaleResult<()> {
        let hosts = match run.record.checkpoint.clone() {
            Some(Checkpoint::Unassigned { hosts }) => {
                info!(hosts = hosts.len(), "machines already unassigned, deleting VMs");
                hosts
            }
            Some(Checkpoint::Unassigning { machines }) => {
                info!(machines = machines.len(), "resuming interrupted unassignment");
                self.unassign_planned(run, &machines)?
            }
            Some(other) => {
                let problem = format!("unexpected checkpoint {other:?} while removing machines");
                return Err(self.fail_assertion(run, problem));
            }
            None => {
                let machines: BTreeMap<String, String> = self
                    .idle_machines(run)?
                    .into_iter()
                    .map(|m| (m.name, m.host_name))
                    .collect();
                if machines.is_empty() {
                    info!("no idle owned machines could be removed");
                    return self.transition(run, ScaleState::MonitorUsage);
                }
                run.record.checkpoint = Some(Checkpoint::Unassigning {
                    machines: machines.clone(),
                });
                self.commit(run)?;
                self.unassign_planned(run, &machines)?
            }
        };

        if hosts.is_empty() {
            info!("no machines were unassigned");
            run.record.checkpoint = None;
            return self.transition(run, ScaleState::MonitorUsage);
        }

        let scheme_id = run.record.config.source.provisioning_scheme_id.clone();
        let task_id = self.platform.start_remove_vms(&scheme_id, &hosts)?;
        info!(%task_id, machines = hosts.len(), "deletion task started");

        run.record.checkpoint = None;
        run.record.pending_task_id = Some(task_id);
        run.record.actions_taken = u32::try_from(hosts.len()).unwrap_or(u32::MAX);
        run.record.last_update_time = Some(epoch_secs());
        self.transition(run, ScaleState::MonitorDeleteMachines)
    }

    /// Unassign the planned machines, then record `Checkpoint::Unassigned`.
    ///
    /// Returns the host names of machines now out of the pool and the
    /// directory.
    fn unassign_planned(
        &self,
        run: &mut PoolRun,
        machines: &BTreeMap<String, String>,
    ) -> ScaleResult<Vec<String>> {
        let hosts = self.unassign(run, machines)?;
        if !hosts.is_empty() {
            run.record.checkpoint = Some(Checkpoint::Unassigned {
                hosts: hosts.clone(),
            });
            self.commit(run)?;
        }
        Ok(hosts)
    }

    /// Take machines out of the pool and the directory.
    ///
    /// A machine that picked up a session or moved to another pool since it
    /// was planned is kept.
    fn unassign(
        &self,
        run: &PoolRun,
        machines: &BTreeMap<String, String>,
    ) -> ScaleResult<Vec<String>> {
        let pool = run.pool.name.as_str();
        let keep: BTreeSet<String> = self
            .platform
            .list_machines(&MachineQuery::default().tagged(&run.record.config.tag))?
            .into_iter()
            .filter(|m| match m.pool.as_deref() {
                Some(p) if p == pool => m.session_count > 0,
                Some(_) => true,
                None => false,
            })
            .map(|m| m.name)
            .collect();

        let mut hosts = Vec::with_capacity(machines.len());
        for (name, host) in machines {
            if keep.contains(name) {
                info!(machine = %name, "machine is busy or in another pool, keeping it");
                continue;
            }
            match self.platform.remove_from_pool(pool, name) {
                Ok(()) | Err(PlatformError::NotFound(_)) => {}
                Err(e) => {
                    error!(machine = %name, error = %e, "failed to remove machine from pool");
                    continue;
                }
            }
            match self.platform.remove_machine(name) {
                Ok(()) | Err(PlatformError::NotFound(_)) => {}
                Err(e) => {
                    warn!(
                        machine = %name,
                        error = %e,
                        "machine left the pool but its record could not be removed"
                    );
                    continue;
                }
            }
            debug!(machine = %name, %host, "machine unassigned");
            hosts.push(host.clone());
        }
        Ok(hosts)
    }

    /// Wait for the deletion task, then delete the removed machines' accounts.
    pub(crate) fn monitor_delete_machines(&self, run: &mut PoolRun) -> ScaleResult<()> {
        let task = self.pending_task(run, TaskKind::Remove)?;
        if task.active {
            debug!(task_id = %task.id, "deletion task still running");
            return Ok(());
        }
        info!(
            task_id = %task.id,
            removed = task.items.len(),
            requested = run.record.actions_taken,
            "deletion task complete"
        );

        let accounts: Vec<String> = task.items.into_iter().map(|i| i.account_name).collect();
        if !accounts.is_empty() {
            let identity_pool_id = &run.record.config.source.identity_pool_id;
            match self.platform.remove_accounts(identity_pool_id, &accounts) {
                Ok(batch) => {
                    if !batch.failed.is_empty() {
                        let failures: Vec<String> = batch
                            .failed
                            .iter()
                            .map(|f| format!("{}: {}", f.name, f.reason))
                            .collect();
                        warn!(?failures, "some identity accounts could not be deleted");
                    }
                    info!(deleted = batch.succeeded.len(), "identity accounts deleted");
                }
                Err(e) => error!(error = %e, "failed to delete identity accounts"),
            }
        }

        run.record.clear_pending();
        self.transition(run, ScaleState::MonitorUsage)
    }
}
