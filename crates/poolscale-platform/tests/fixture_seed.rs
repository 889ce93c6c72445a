//! Seeding a local platform from a TOML fixture.

use poolscale_platform::*;

const FIXTURE: &str = r#"
tags = ["operator"]

[[catalogs]]
name = "win11"
provisioning = "machine_creation"
session_support = "single_session"
provisioning_scheme_id = "scheme-win11"

[[provisioning_schemes]]
id = "scheme-win11"
name = "win11"
identity_pool_id = "ids-win11"
vm_quota = 10

[[identity_pools]]
id = "ids-win11"
name = "win11"
naming_scheme = "VDA-###"

[[pools]]
name = "desktops"
session_support = "single_session"

[[pools.machines]]
name = "VDA-STATIC-1"
catalog = "win11"
sessions = 1
tags = ["operator"]

[[pools.machines]]
name = "VDA-STATIC-2"
catalog = "win11"
"#;

fn seeded() -> LocalPlatform {
    let fixture: PlatformFixture = toml::from_str(FIXTURE).unwrap();
    let platform = LocalPlatform::open_in_memory().unwrap();
    platform.seed(&fixture).unwrap();
    platform
}

#[test]
fn seed_populates_every_object() {
    let platform = seeded();

    let catalog = platform.get_catalog("win11").unwrap().unwrap();
    assert_eq!(catalog.provisioning, ProvisioningType::MachineCreation);
    assert!(!catalog.physical);

    let scheme = platform.get_provisioning_scheme("scheme-win11").unwrap().unwrap();
    assert_eq!(scheme.vm_quota, Some(10));

    let ids = platform.get_identity_pool("ids-win11").unwrap().unwrap();
    assert_eq!(ids.next_index, 1);
    assert_eq!(ids.account_name(7).as_deref(), Some("VDA-007"));

    assert!(platform.get_tag("operator").unwrap().is_some());

    let pool = platform.get_pool("desktops").unwrap().unwrap();
    assert_eq!(pool.total_capacity, 2);
    assert_eq!(pool.sessions, 1);

    let tagged = platform
        .list_machines(&MachineQuery::default().tagged("operator"))
        .unwrap();
    assert_eq!(tagged.len(), 1);
}

#[test]
fn reseeding_keeps_pool_annotations() {
    let platform = seeded();
    let mut entries = std::collections::BTreeMap::new();
    entries.insert("PoolScale.State".to_string(), "MonitorUsage".to_string());
    platform.set_pool_metadata("desktops", &entries).unwrap();

    let fixture: PlatformFixture = toml::from_str(FIXTURE).unwrap();
    platform.seed(&fixture).unwrap();

    let pool = platform.get_pool("desktops").unwrap().unwrap();
    assert_eq!(pool.metadata["PoolScale.State"], "MonitorUsage");
}
