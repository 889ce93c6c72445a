use poolscale_autoscale::{LoadSample, MetadataRecord};
use poolscale_platform::{Platform, Pool};
use serde_json::{Value, json};

use super::split_pools;
use crate::profile::Profile;

pub fn status(profile: &Profile, pools: &str) -> anyhow::Result<()> {
    let pools = split_pools(pools)?;
    let platform = profile.open_platform()?;

    let mut reports = Vec::with_capacity(pools.len());
    for name in &pools {
        let pool = platform
            .get_pool(name)?
            .ok_or_else(|| anyhow::anyhow!("pool not found: {name}"))?;
        reports.push(pool_status(&platform, &pool)?);
    }
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

/// The pool's stored record and current load as JSON.
pub fn pool_status<P: Platform>(platform: &P, pool: &Pool) -> anyhow::Result<Value> {
    let sample = LoadSample::read(platform, pool)?;
    let load = json!({
        "capacity": sample.capacity(),
        "percent": sample.percent(),
    });

    let Some(record) = MetadataRecord::from_metadata(&pool.metadata)? else {
        return Ok(json!({
            "pool": pool.name,
            "initialized": false,
            "load": load,
        }));
    };

    let config = &record.config;
    Ok(json!({
        "pool": pool.name,
        "initialized": true,
        "load": load,
        "state": record.state.as_str(),
        "clean_exit": record.clean_exit,
        "tag": config.tag,
        "catalog": config.source.catalog_name,
        "provisioning_scheme_id": config.source.provisioning_scheme_id,
        "identity_pool_id": config.source.identity_pool_id,
        "high_watermark": config.watermarks.high(),
        "low_watermark": config.watermarks.low(),
        "max_machines": config.max_machines,
        "pending_task_id": record.pending_task_id,
        "actions_taken": record.actions_taken,
        "last_update_time": record.last_update_time,
        "observed_load": record.observed_load,
        "checkpoint": serde_json::to_value(&record.checkpoint)?,
    }))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use poolscale_autoscale::{Autoscaler, ConfigUpdate};
    use poolscale_platform::*;

    use super::*;

    fn platform() -> LocalPlatform {
        let platform = LocalPlatform::open_in_memory().unwrap();
        let fixture: PlatformFixture =
            toml::from_str(include_str!("../../../../demos/desktops/platform.toml")).unwrap();
        platform.seed(&fixture).unwrap();
        platform
    }

    #[test]
    fn uninitialized_pool_reports_load_only() {
        let platform = platform();
        let pool = platform.get_pool("desktops").unwrap().unwrap();
        let status = pool_status(&platform, &pool).unwrap();
        assert_eq!(status["initialized"], false);
        assert!(status.get("state").is_none());
        assert!(status["load"]["capacity"].as_u64().unwrap() > 0);
    }

    #[test]
    fn initialized_pool_reports_record() {
        let scaler = Autoscaler::new(platform());
        let update = ConfigUpdate {
            catalog: Some("win11".to_string()),
            max_machines: Some(12),
            ..Default::default()
        };
        scaler.run_pool("desktops", &update).unwrap();

        let pool = scaler.platform().get_pool("desktops").unwrap().unwrap();
        let status = pool_status(scaler.platform(), &pool).unwrap();
        assert_eq!(status["initialized"], true);
        assert_eq!(status["tag"], "desktops-autoscale");
        assert_eq!(status["max_machines"], 12);
        assert_eq!(status["clean_exit"], true);
        assert!(status["checkpoint"].is_null());
    }

    #[test]
    fn corrupt_record_is_an_error() {
        let platform = platform();
        let mut pool = platform.get_pool("desktops").unwrap().unwrap();
        pool.metadata = BTreeMap::from([("PoolScale.State".to_string(), "Sideways".to_string())]);
        assert!(pool_status(&platform, &pool).is_err());
    }
}
