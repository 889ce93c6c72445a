//! MonitorUsage: compare pool load against the watermarks.

use poolscale_platform::Platform;
use tracing::{debug, info};

use crate::error::ScaleResult;
use crate::load::LoadSample;
use crate::scaler::{Autoscaler, PoolRun};
use crate::state::ScaleState;

impl<P: Platform> Autoscaler<P> {
    pub(crate) fn monitor_usage(&self, run: &mut PoolRun) -> ScaleResult<()> {
        let sample = LoadSample::read(&self.platform, &run.pool)?;
        let Some(load) = sample.percent() else {
            debug!("pool has no capacity, nothing to evaluate");
            return Ok(());
        };

        let watermarks = run.record.config.watermarks;
        debug!(
            load,
            high = watermarks.high(),
            low = watermarks.low(),
            capacity = sample.capacity(),
            "load evaluated"
        );

        if load > f64::from(watermarks.high()) {
            if let Some(max) = run.record.config.max_machines {
                let owned = self.owned_machines(run)?.len();
                if owned >= max as usize {
                    info!(load, owned, max, "load above high watermark but machine cap reached");
                    return Ok(());
                }
            }
            info!(load, high = watermarks.high(), "load above high watermark");
            run.record.observed_load = Some(load);
            return self.transition(run, ScaleState::ProvisionMachines);
        }

        if load < f64::from(watermarks.low()) {
            let idle = self.idle_machines(run)?;
            if idle.is_empty() {
                debug!(load, "load below low watermark but no idle owned machines");
                return Ok(());
            }
            info!(
                load,
                low = watermarks.low(),
                idle = idle.len(),
                "load below low watermark"
            );
            run.record.observed_load = Some(load);
            return self.transition(run, ScaleState::RemoveMachines);
        }

        debug!(load, "load within watermarks");
        Ok(())
    }
}
