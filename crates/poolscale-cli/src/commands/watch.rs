use std::time::Duration;

use poolscale_autoscale::Autoscaler;
use tokio::sync::watch;
use tracing::{error, info};

use super::split_pools;
use crate::profile::Profile;

/// Invoke `pools` every `interval` seconds until ctrl-c.
pub async fn watch(profile: &Profile, pools: &str, interval: u64) -> anyhow::Result<()> {
    let pools = split_pools(pools)?;
    anyhow::ensure!(interval > 0, "interval must be at least one second");
    let scaler = Autoscaler::new(profile.open_platform()?).with_defaults(profile.scale_defaults()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
        }
        let _ = shutdown_tx.send(true);
    });

    scaler
        .run_periodic(&pools, Duration::from_secs(interval), shutdown_rx)
        .await;
    info!("watch stopped");
    Ok(())
}
