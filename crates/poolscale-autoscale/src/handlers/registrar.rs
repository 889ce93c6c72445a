//! AddMachines: turn freshly created VMs into owned pool members.
//!
//! Two steps with a checkpoint in between:
//!
//! 1. register every created VM against the catalog and tag it, then record
//!    `Checkpoint::Registered`;
//! 2. add every registered machine to the pool.
//!
//! A re-entry that finds the checkpoint goes straight to step two. Without it,
//! step one runs again and hosts registered by the interrupted run are
//! adopted as they are. A machine
//! that registers but cannot be added stays registered and tagged outside the
//! pool; nothing rolls that back.

use poolscale_platform::{Machine, MachineQuery, Platform, PlatformError, TaskKind};
use tracing::{debug, error, info, warn};

use crate::error::ScaleResult;
use crate::metadata::Checkpoint;
use crate::scaler::{Autoscaler, PoolRun, epoch_secs};
use crate::state::ScaleState;

impl<P: Platform> Autoscaler<P> {
    pub(crate) fn add_machines(&self, run: &mut PoolRun) -> ScaleResult<()> {
        let machines = match run.record.checkpoint.clone() {
            Some(Checkpoint::Registered { machines }) => {
                info!(machines = machines.len(), "registration already done, adding to pool");
                machines
            }
            Some(other) => {
                let problem = format!("unexpected checkpoint {other:?} while adding machines");
                return Err(self.fail_assertion(run, problem));
            }
            None => {
                let registered = self.register_created(run)?;
                run.record.checkpoint = Some(Checkpoint::Registered {
                    machines: registered.clone(),
                });
                self.commit(run)?;
                registered
            }
        };

        let mut added = 0;
        for machine in &machines {
            match self.platform.add_to_pool(&run.pool.name, machine) {
                Ok(()) => {
                    debug!(%machine, "machine added to pool");
                    added += 1;
                }
                Err(e) => error!(
                    %machine,
                    error = %e,
                    "failed to add machine to pool; it stays registered and tagged"
                ),
            }
        }
        info!(
            added,
            registered = machines.len(),
            requested = run.record.actions_taken,
            "machines added to pool"
        );

        run.record.checkpoint = None;
        run.record.clear_pending();
        run.record.last_update_time = Some(epoch_secs());
        self.transition(run, ScaleState::MonitorUsage)
    }

    /// Register and tag the machines created by the pending task.
    ///
    /// Returns the names of machines that are registered and carry the tag.
    fn register_created(&self, run: &mut PoolRun) -> ScaleResult<Vec<String>> {
        let task = self.pending_task(run, TaskKind::Create)?;
        let catalog = &run.record.config.source.catalog_name;
        let tag = &run.record.config.tag;

        let mut registered = Vec::with_capacity(task.items.len());
        for item in &task.items {
            let machine = match self.platform.register_machine(catalog, &item.host_name) {
                Ok(machine) => machine,
                Err(PlatformError::Conflict(_)) => {
                    match self.already_registered(&run.pool.name, &item.host_name)? {
                        Some(machine) => {
                            info!(
                                machine = %machine.name,
                                "host already registered, adopting it"
                            );
                            machine
                        }
                        None => {
                            warn!(host = %item.host_name, "host registered elsewhere; skipping it");
                            continue;
                        }
                    }
                }
                Err(e) => {
                    error!(host = %item.host_name, error = %e, "failed to register machine");
                    continue;
                }
            };
            if let Err(e) = self.platform.tag_machine(&machine.name, tag) {
                warn!(
                    machine = %machine.name,
                    error = %e,
                    "failed to tag machine; leaving it out of the pool"
                );
                continue;
            }
            registered.push(machine.name);
        }

        info!(
            task_id = %task.id,
            registered = registered.len(),
            created = task.items.len(),
            "created machines registered"
        );
        Ok(registered)
    }

    /// The directory record for a host registered by an earlier, interrupted
    /// run. `None` if it belongs to another pool.
    fn already_registered(&self, pool: &str, host_name: &str) -> ScaleResult<Option<Machine>> {
        let machine = self
            .platform
            .list_machines(&MachineQuery::default().host(host_name))?
            .into_iter()
            .next();
        Ok(machine.filter(|m| m.pool.as_deref().is_none_or(|p| p == pool)))
    }
}
