mod common;

use std::time::Duration;

use common::*;
use poolscale_autoscale::*;
use poolscale_platform::*;
use tokio::sync::watch;

#[tokio::test]
async fn invoker_runs_until_shutdown() {
    let platform = platform(SessionSupport::SingleSession);
    add_static_fleet(&platform, 10, 10);
    let scaler = Autoscaler::new(platform.clone());
    scaler.run_pool(POOL, &init_update(80, 20)).unwrap();

    let (tx, rx) = watch::channel(false);
    let pools = vec![POOL.to_string()];
    let stop = async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        tx.send(true).unwrap();
    };
    tokio::join!(scaler.run_periodic(&pools, Duration::from_millis(10), rx), stop);

    // Three invocations take the pool through a full scale-up; later ones idle.
    let rec = record(&platform);
    assert_eq!(rec.state, ScaleState::MonitorUsage);
    assert!(rec.clean_exit);
    let owned = platform
        .list_machines(&MachineQuery::default().tagged(TAG))
        .unwrap();
    assert_eq!(owned.len(), 3);
}

#[tokio::test]
async fn invoker_survives_failing_pools() {
    let scaler = Autoscaler::new(platform(SessionSupport::SingleSession));

    let (tx, rx) = watch::channel(false);
    // Neither pool is usable: one is missing, the other was never initialized.
    let pools = vec!["ghost".to_string(), POOL.to_string()];
    let stop = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
    };
    tokio::join!(scaler.run_periodic(&pools, Duration::from_millis(10), rx), stop);

    assert!(raw_metadata(scaler.platform()).is_empty());
}
