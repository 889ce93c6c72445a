//! Shared fixtures for autoscaler integration tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use poolscale_autoscale::metadata::keys;
use poolscale_autoscale::*;
use poolscale_platform::*;

pub const POOL: &str = "desktops";
pub const CATALOG: &str = "win11";
pub const SCHEME: &str = "scheme-win11";
pub const IDENTITY_POOL: &str = "ids-win11";
pub const TAG: &str = "desktops-autoscale";

/// Route autoscaler events to the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A local platform with one pool and a valid machine source.
pub fn platform(mode: SessionSupport) -> LocalPlatform {
    init_tracing();
    let platform = LocalPlatform::open_in_memory().unwrap();
    platform
        .put_pool(&PoolRecord {
            name: POOL.to_string(),
            session_support: mode,
            metadata: BTreeMap::new(),
        })
        .unwrap();
    platform
        .put_catalog(&Catalog {
            name: CATALOG.to_string(),
            physical: false,
            provisioning: ProvisioningType::MachineCreation,
            session_support: mode,
            provisioning_scheme_id: Some(SCHEME.to_string()),
        })
        .unwrap();
    platform
        .put_provisioning_scheme(&ProvisioningScheme {
            id: SCHEME.to_string(),
            name: CATALOG.to_string(),
            identity_pool_id: Some(IDENTITY_POOL.to_string()),
            vm_quota: None,
        })
        .unwrap();
    platform
        .put_identity_pool(&IdentityPool {
            id: IDENTITY_POOL.to_string(),
            name: CATALOG.to_string(),
            naming_scheme: Some("VDA-###".to_string()),
            next_index: 1,
            quota: None,
        })
        .unwrap();
    platform
}

/// Add an operator-created (untagged) pool member.
pub fn add_static(platform: &LocalPlatform, name: &str, sessions: u32, load_index: u32) {
    platform
        .put_machine(&Machine {
            name: name.to_string(),
            host_name: name.to_string(),
            account_name: None,
            catalog: CATALOG.to_string(),
            pool: Some(POOL.to_string()),
            tags: Default::default(),
            session_count: sessions,
            load_index,
        })
        .unwrap();
}

/// Add `count` operator machines, the first `busy` of which have one session.
pub fn add_static_fleet(platform: &LocalPlatform, count: u32, busy: u32) {
    for i in 0..count {
        let sessions = u32::from(i < busy);
        add_static(platform, &format!("STATIC-{i:03}"), sessions, 0);
    }
}

pub fn init_update(high: i64, low: i64) -> ConfigUpdate {
    ConfigUpdate {
        watermarks: Some(Watermarks::new(high, low).unwrap()),
        catalog: Some(CATALOG.to_string()),
        ..Default::default()
    }
}

pub fn record<P: Platform>(platform: &P) -> MetadataRecord {
    let pool = platform.get_pool(POOL).unwrap().unwrap();
    MetadataRecord::from_metadata(&pool.metadata).unwrap().unwrap()
}

pub fn raw_metadata<P: Platform>(platform: &P) -> BTreeMap<String, String> {
    platform.get_pool(POOL).unwrap().unwrap().metadata
}

/// Overwrite the stored record, e.g. to park the pool in a given state.
pub fn store_record<P: Platform>(platform: &P, record: &MetadataRecord) {
    let (entries, cleared) = record.to_metadata().unwrap();
    platform.set_pool_metadata(POOL, &entries).unwrap();
    platform.remove_pool_metadata(POOL, &cleared).unwrap();
}

pub fn set_state<P: Platform>(platform: &P, state: ScaleState) {
    let entries: BTreeMap<String, String> = [(keys::STATE.to_string(), state.to_string())].into();
    platform.set_pool_metadata(POOL, &entries).unwrap();
}

/// Invoke the pool once with no configuration changes.
pub fn step<P: Platform>(scaler: &Autoscaler<P>) -> ScaleResult<ScaleState> {
    scaler.run_pool(POOL, &ConfigUpdate::default())
}

/// Platform wrapper that counts mutations and injects failures.
pub struct Faulty {
    pub inner: LocalPlatform,
    pub mutations: Cell<usize>,
    pub registrations: Cell<usize>,
    pub fail_add_to_pool: Cell<bool>,
    pub fail_start_remove: Cell<bool>,
    /// The pool's checkpoint as it stood when the first machine left it.
    pub checkpoint_at_unassign: RefCell<Option<Option<String>>>,
}

impl Faulty {
    pub fn new(inner: LocalPlatform) -> Self {
        Self {
            inner,
            mutations: Cell::new(0),
            registrations: Cell::new(0),
            fail_add_to_pool: Cell::new(false),
            fail_start_remove: Cell::new(false),
            checkpoint_at_unassign: RefCell::new(None),
        }
    }

    fn mutated(&self) {
        self.mutations.set(self.mutations.get() + 1);
    }
}

impl Platform for Faulty {
    fn get_pool(&self, name: &str) -> PlatformResult<Option<Pool>> {
        self.inner.get_pool(name)
    }

    fn set_pool_metadata(&self, pool: &str, entries: &BTreeMap<String, String>) -> PlatformResult<()> {
        self.inner.set_pool_metadata(pool, entries)
    }

    fn remove_pool_metadata(&self, pool: &str, keys: &[&str]) -> PlatformResult<()> {
        self.inner.remove_pool_metadata(pool, keys)
    }

    fn list_machines(&self, query: &MachineQuery) -> PlatformResult<Vec<Machine>> {
        self.inner.list_machines(query)
    }

    fn register_machine(&self, catalog: &str, host_name: &str) -> PlatformResult<Machine> {
        self.mutated();
        self.registrations.set(self.registrations.get() + 1);
        self.inner.register_machine(catalog, host_name)
    }

    fn remove_machine(&self, machine: &str) -> PlatformResult<()> {
        self.mutated();
        self.inner.remove_machine(machine)
    }

    fn tag_machine(&self, machine: &str, tag: &str) -> PlatformResult<()> {
        self.mutated();
        self.inner.tag_machine(machine, tag)
    }

    fn add_to_pool(&self, pool: &str, machine: &str) -> PlatformResult<()> {
        self.mutated();
        if self.fail_add_to_pool.get() {
            return Err(PlatformError::Rejected("pool membership is locked".to_string()));
        }
        self.inner.add_to_pool(pool, machine)
    }

    fn remove_from_pool(&self, pool: &str, machine: &str) -> PlatformResult<()> {
        self.mutated();
        if self.checkpoint_at_unassign.borrow().is_none() {
            let checkpoint = raw_metadata(&self.inner).get(keys::CHECKPOINT).cloned();
            *self.checkpoint_at_unassign.borrow_mut() = Some(checkpoint);
        }
        self.inner.remove_from_pool(pool, machine)
    }

    fn get_tag(&self, name: &str) -> PlatformResult<Option<Tag>> {
        self.inner.get_tag(name)
    }

    fn create_tag(&self, name: &str) -> PlatformResult<Tag> {
        self.mutated();
        self.inner.create_tag(name)
    }

    fn get_catalog(&self, name: &str) -> PlatformResult<Option<Catalog>> {
        self.inner.get_catalog(name)
    }

    fn get_provisioning_scheme(&self, id: &str) -> PlatformResult<Option<ProvisioningScheme>> {
        self.inner.get_provisioning_scheme(id)
    }

    fn get_identity_pool(&self, id: &str) -> PlatformResult<Option<IdentityPool>> {
        self.inner.get_identity_pool(id)
    }

    fn create_accounts(&self, identity_pool_id: &str, count: u32) -> PlatformResult<AccountBatch> {
        self.mutated();
        self.inner.create_accounts(identity_pool_id, count)
    }

    fn remove_accounts(&self, identity_pool_id: &str, names: &[String]) -> PlatformResult<AccountBatch> {
        self.mutated();
        self.inner.remove_accounts(identity_pool_id, names)
    }

    fn start_create_vms(&self, scheme_id: &str, accounts: &[String]) -> PlatformResult<TaskId> {
        self.mutated();
        self.inner.start_create_vms(scheme_id, accounts)
    }

    fn start_remove_vms(&self, scheme_id: &str, host_names: &[String]) -> PlatformResult<TaskId> {
        self.mutated();
        if self.fail_start_remove.get() {
            return Err(PlatformError::Rejected("hypervisor unreachable".to_string()));
        }
        self.inner.start_remove_vms(scheme_id, host_names)
    }

    fn get_task(&self, id: &str) -> PlatformResult<Option<Task>> {
        self.inner.get_task(id)
    }
}
