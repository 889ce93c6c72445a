use clap::Args;
use poolscale_autoscale::{Autoscaler, ConfigUpdate, PoolOutcome, Watermarks};
use tracing::info;

use super::split_pools;
use crate::profile::Profile;

/// Configuration parameters accepted on an invocation.
#[derive(Debug, Clone, Default, Args)]
pub struct ScaleArgs {
    /// Scale up above this load percentage (requires --low-watermark).
    #[arg(long)]
    pub high_watermark: Option<i64>,
    /// Scale down below this load percentage (requires --high-watermark).
    #[arg(long)]
    pub low_watermark: Option<i64>,
    /// Cap on machines the autoscaler owns; zero or less removes the cap.
    #[arg(long, allow_negative_numbers = true)]
    pub max_machines: Option<i64>,
    /// Machine catalog new machines are provisioned from.
    #[arg(long)]
    pub catalog: Option<String>,
    /// Ownership tag applied to provisioned machines.
    #[arg(long)]
    pub tag: Option<String>,
}

impl ScaleArgs {
    pub fn to_update(&self) -> anyhow::Result<ConfigUpdate> {
        Ok(ConfigUpdate {
            watermarks: Watermarks::from_pair(self.high_watermark, self.low_watermark)?,
            max_machines: self.max_machines,
            catalog: self.catalog.clone(),
            tag: self.tag.clone(),
        })
    }
}

pub fn run(profile: &Profile, pools: &str, args: &ScaleArgs) -> anyhow::Result<()> {
    let pools = split_pools(pools)?;
    let update = args.to_update()?;
    let scaler = Autoscaler::new(profile.open_platform()?).with_defaults(profile.scale_defaults()?);

    let outcomes = scaler.run(&pools, &update)?;
    report(&outcomes)
}

/// Print one line per pool; fail if any pool failed.
pub fn report(outcomes: &[PoolOutcome]) -> anyhow::Result<()> {
    let mut failed = 0;
    for outcome in outcomes {
        match &outcome.result {
            Ok(state) => println!("{}: {state}", outcome.pool),
            Err(e) => {
                failed += 1;
                println!("{}: failed: {e}", outcome.pool);
            }
        }
    }
    info!(pools = outcomes.len(), failed, "invocation finished");
    anyhow::ensure!(failed == 0, "{failed} of {} pools failed", outcomes.len());
    Ok(())
}
