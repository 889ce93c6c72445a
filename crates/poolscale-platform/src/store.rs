//! LocalPlatform — redb-backed simulated platform.
//!
//! Keeps the platform's bookkeeping (pools, machine directory, tags, machine
//! sources, identity accounts, VMs and tasks) in redb tables. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports both
//! on-disk and in-memory backends (the latter for testing).
//!
//! VM tasks finish by the clock: a task reports active until
//! `task_latency` has elapsed since it was issued. [`LocalPlatform::finish_task`]
//! short-circuits that.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::error::{PlatformError, PlatformResult};
use crate::platform::Platform;
use crate::tables::*;
use crate::types::*;

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Convert any `Display` error into a `PlatformError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| PlatformError::$variant(e.to_string())
    };
}

/// Thread-safe simulated platform backed by redb.
#[derive(Clone)]
pub struct LocalPlatform {
    db: Arc<Database>,
    task_latency: Duration,
}

impl LocalPlatform {
    /// Open (or create) a persistent platform store at the given path.
    pub fn open(path: &Path) -> PlatformResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let platform = Self {
            db: Arc::new(db),
            task_latency: Duration::ZERO,
        };
        platform.ensure_tables()?;
        debug!(?path, "local platform opened");
        Ok(platform)
    }

    /// Create an ephemeral in-memory platform (for testing).
    pub fn open_in_memory() -> PlatformResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let platform = Self {
            db: Arc::new(db),
            task_latency: Duration::ZERO,
        };
        platform.ensure_tables()?;
        debug!("in-memory local platform opened");
        Ok(platform)
    }

    /// Set how long issued VM tasks report themselves as active.
    pub fn with_task_latency(mut self, latency: Duration) -> Self {
        self.task_latency = latency;
        self
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> PlatformResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [POOLS, MACHINES, CATALOGS, SCHEMES, IDENTITY_POOLS, ACCOUNTS, TAGS, VMS, TASKS] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic JSON table access ──────────────────────────────────

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> PlatformResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        read_in(&table, key)
    }

    fn list_json<T: DeserializeOwned>(&self, def: JsonTable) -> PlatformResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(item);
        }
        Ok(results)
    }

    fn put_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> PlatformResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            write_in(&mut table, key, value)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Read-modify-write a single record. Fails with `NotFound` if absent.
    fn update_json<T, F>(&self, def: JsonTable, key: &str, what: &str, f: F) -> PlatformResult<()>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> PlatformResult<()>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let mut record: T = read_in(&table, key)?
                .ok_or_else(|| PlatformError::NotFound(format!("{what} {key}")))?;
            f(&mut record)?;
            write_in(&mut table, key, &record)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Administration ─────────────────────────────────────────────

    /// Insert or update a pool record.
    pub fn put_pool(&self, pool: &PoolRecord) -> PlatformResult<()> {
        self.put_json(POOLS, &pool.name, pool)?;
        debug!(pool = %pool.name, "pool stored");
        Ok(())
    }

    pub fn list_pools(&self) -> PlatformResult<Vec<PoolRecord>> {
        self.list_json(POOLS)
    }

    /// Insert or update a machine record.
    pub fn put_machine(&self, machine: &Machine) -> PlatformResult<()> {
        self.put_json(MACHINES, &machine.name, machine)
    }

    /// Set a machine's session count and load index.
    pub fn set_machine_load(&self, machine: &str, sessions: u32, load_index: u32) -> PlatformResult<()> {
        let load_index = load_index.min(MAX_LOAD_INDEX);
        self.update_json(MACHINES, machine, "machine", |m: &mut Machine| {
            m.session_count = sessions;
            m.load_index = load_index;
            Ok(())
        })
    }

    pub fn put_catalog(&self, catalog: &Catalog) -> PlatformResult<()> {
        self.put_json(CATALOGS, &catalog.name, catalog)
    }

    pub fn put_provisioning_scheme(&self, scheme: &ProvisioningScheme) -> PlatformResult<()> {
        self.put_json(SCHEMES, &scheme.id, scheme)
    }

    pub fn put_identity_pool(&self, identity_pool: &IdentityPool) -> PlatformResult<()> {
        self.put_json(IDENTITY_POOLS, &identity_pool.id, identity_pool)
    }

    /// List the accounts of one identity pool.
    pub fn list_accounts(&self, identity_pool_id: &str) -> PlatformResult<Vec<Account>> {
        let accounts: Vec<Account> = self.list_json(ACCOUNTS)?;
        Ok(accounts
            .into_iter()
            .filter(|a| a.identity_pool_id == identity_pool_id)
            .collect())
    }

    pub fn get_vm(&self, host_name: &str) -> PlatformResult<Option<Vm>> {
        self.get_json(VMS, host_name)
    }

    pub fn list_vms(&self) -> PlatformResult<Vec<Vm>> {
        self.list_json(VMS)
    }

    pub fn list_tasks(&self) -> PlatformResult<Vec<Task>> {
        let now = epoch_secs();
        let mut tasks: Vec<Task> = self.list_json(TASKS)?;
        for task in &mut tasks {
            task.active = now < task.ready_at;
        }
        Ok(tasks)
    }

    /// Mark a task complete regardless of the configured latency.
    pub fn finish_task(&self, id: &str) -> PlatformResult<()> {
        self.update_json(TASKS, id, "task", |t: &mut Task| {
            t.ready_at = 0;
            t.active = false;
            Ok(())
        })?;
        debug!(task_id = %id, "task finished");
        Ok(())
    }

    fn issue_task(
        &self,
        txn: &redb::WriteTransaction,
        kind: TaskKind,
        scheme_id: &str,
        items: Vec<TaskItem>,
        failures: Vec<TaskFailure>,
    ) -> PlatformResult<TaskId> {
        let now = epoch_secs();
        let ready_at = now + self.task_latency.as_secs();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            kind,
            scheme_id: scheme_id.to_string(),
            issued_at: now,
            ready_at,
            active: now < ready_at,
            items,
            failures,
        };
        let mut table = txn.open_table(TASKS).map_err(map_err!(Table))?;
        write_in(&mut table, &task.id, &task)?;
        debug!(
            task_id = %task.id,
            %kind,
            items = task.items.len(),
            failures = task.failures.len(),
            "task issued"
        );
        Ok(task.id)
    }
}

impl Platform for LocalPlatform {
    // ── Pools ──────────────────────────────────────────────────────

    fn get_pool(&self, name: &str) -> PlatformResult<Option<Pool>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let pools = txn.open_table(POOLS).map_err(map_err!(Table))?;
        let Some(record) = read_in::<PoolRecord, _>(&pools, name)? else {
            return Ok(None);
        };

        let machines = txn.open_table(MACHINES).map_err(map_err!(Table))?;
        let mut total_capacity = 0;
        let mut sessions = 0;
        for entry in machines.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let machine: Machine =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if machine.pool.as_deref() == Some(name) {
                total_capacity += 1;
                sessions += machine.session_count;
            }
        }

        Ok(Some(Pool {
            name: record.name,
            session_support: record.session_support,
            total_capacity,
            sessions,
            metadata: record.metadata,
        }))
    }

    fn set_pool_metadata(
        &self,
        pool: &str,
        entries: &BTreeMap<String, String>,
    ) -> PlatformResult<()> {
        self.update_json(POOLS, pool, "pool", |p: &mut PoolRecord| {
            p.metadata
                .extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(())
        })
    }

    fn remove_pool_metadata(&self, pool: &str, keys: &[&str]) -> PlatformResult<()> {
        self.update_json(POOLS, pool, "pool", |p: &mut PoolRecord| {
            for key in keys {
                p.metadata.remove(*key);
            }
            Ok(())
        })
    }

    // ── Machines ───────────────────────────────────────────────────

    fn list_machines(&self, query: &MachineQuery) -> PlatformResult<Vec<Machine>> {
        let machines: Vec<Machine> = self.list_json(MACHINES)?;
        Ok(machines.into_iter().filter(|m| query.matches(m)).collect())
    }

    fn register_machine(&self, catalog: &str, host_name: &str) -> PlatformResult<Machine> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let machine;
        {
            let catalogs = txn.open_table(CATALOGS).map_err(map_err!(Table))?;
            if read_in::<Catalog, _>(&catalogs, catalog)?.is_none() {
                return Err(PlatformError::NotFound(format!("catalog {catalog}")));
            }
            let vms = txn.open_table(VMS).map_err(map_err!(Table))?;
            let vm: Vm = read_in(&vms, host_name)?
                .ok_or_else(|| PlatformError::NotFound(format!("vm {host_name}")))?;

            let mut machines = txn.open_table(MACHINES).map_err(map_err!(Table))?;
            if read_in::<Machine, _>(&machines, host_name)?.is_some() {
                return Err(PlatformError::Conflict(format!("machine {host_name}")));
            }
            machine = Machine {
                name: vm.host_name.clone(),
                host_name: vm.host_name,
                account_name: Some(vm.account_name),
                catalog: catalog.to_string(),
                pool: None,
                tags: Default::default(),
                session_count: 0,
                load_index: 0,
            };
            write_in(&mut machines, &machine.name, &machine)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(machine = %machine.name, %catalog, "machine registered");
        Ok(machine)
    }

    fn remove_machine(&self, machine: &str) -> PlatformResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(MACHINES).map_err(map_err!(Table))?;
            existed = table.remove(machine).map_err(map_err!(Write))?.is_some();
        }
        if !existed {
            return Err(PlatformError::NotFound(format!("machine {machine}")));
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%machine, "machine record removed");
        Ok(())
    }

    fn tag_machine(&self, machine: &str, tag: &str) -> PlatformResult<()> {
        if self.get_tag(tag)?.is_none() {
            return Err(PlatformError::NotFound(format!("tag {tag}")));
        }
        self.update_json(MACHINES, machine, "machine", |m: &mut Machine| {
            m.tags.insert(tag.to_string());
            Ok(())
        })
    }

    fn add_to_pool(&self, pool: &str, machine: &str) -> PlatformResult<()> {
        if self.get_json::<PoolRecord>(POOLS, pool)?.is_none() {
            return Err(PlatformError::NotFound(format!("pool {pool}")));
        }
        self.update_json(MACHINES, machine, "machine", |m: &mut Machine| {
            match m.pool.as_deref() {
                Some(current) if current != pool => Err(PlatformError::Conflict(format!(
                    "machine {machine} already belongs to pool {current}"
                ))),
                _ => {
                    m.pool = Some(pool.to_string());
                    Ok(())
                }
            }
        })
    }

    fn remove_from_pool(&self, pool: &str, machine: &str) -> PlatformResult<()> {
        self.update_json(MACHINES, machine, "machine", |m: &mut Machine| {
            if m.pool.as_deref() != Some(pool) {
                return Err(PlatformError::NotFound(format!(
                    "machine {machine} in pool {pool}"
                )));
            }
            m.pool = None;
            Ok(())
        })
    }

    // ── Tags ───────────────────────────────────────────────────────

    fn get_tag(&self, name: &str) -> PlatformResult<Option<Tag>> {
        self.get_json(TAGS, name)
    }

    fn create_tag(&self, name: &str) -> PlatformResult<Tag> {
        if self.get_tag(name)?.is_some() {
            return Err(PlatformError::Conflict(format!("tag {name}")));
        }
        let tag = Tag {
            name: name.to_string(),
            created_at: epoch_secs(),
        };
        self.put_json(TAGS, name, &tag)?;
        debug!(tag = %name, "tag created");
        Ok(tag)
    }

    // ── Machine sources ────────────────────────────────────────────

    fn get_catalog(&self, name: &str) -> PlatformResult<Option<Catalog>> {
        self.get_json(CATALOGS, name)
    }

    fn get_provisioning_scheme(&self, id: &str) -> PlatformResult<Option<ProvisioningScheme>> {
        self.get_json(SCHEMES, id)
    }

    fn get_identity_pool(&self, id: &str) -> PlatformResult<Option<IdentityPool>> {
        self.get_json(IDENTITY_POOLS, id)
    }

    // ── Identity accounts ──────────────────────────────────────────

    fn create_accounts(&self, identity_pool_id: &str, count: u32) -> PlatformResult<AccountBatch> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut batch = AccountBatch::default();
        {
            let mut pools = txn.open_table(IDENTITY_POOLS).map_err(map_err!(Table))?;
            let mut identity_pool: IdentityPool = read_in(&pools, identity_pool_id)?
                .ok_or_else(|| PlatformError::NotFound(format!("identity pool {identity_pool_id}")))?;
            if identity_pool.account_name(identity_pool.next_index).is_none() {
                return Err(PlatformError::Rejected(format!(
                    "identity pool {identity_pool_id} has no naming scheme"
                )));
            }

            let mut accounts = txn.open_table(ACCOUNTS).map_err(map_err!(Table))?;
            for _ in 0..count {
                let index = identity_pool.next_index;
                identity_pool.next_index += 1;
                let name = identity_pool.account_name(index).unwrap_or_default();

                if identity_pool.quota == Some(0) {
                    batch.failed.push(AccountFailure {
                        name,
                        reason: "identity pool quota exhausted".to_string(),
                    });
                    continue;
                }
                let key = account_key(identity_pool_id, &name);
                if read_in::<Account, _>(&accounts, &key)?.is_some() {
                    batch.failed.push(AccountFailure {
                        name,
                        reason: "account already exists".to_string(),
                    });
                    continue;
                }

                let account = Account {
                    name,
                    identity_pool_id: identity_pool_id.to_string(),
                };
                write_in(&mut accounts, &key, &account)?;
                if let Some(quota) = identity_pool.quota.as_mut() {
                    *quota -= 1;
                }
                batch.succeeded.push(account);
            }
            write_in(&mut pools, identity_pool_id, &identity_pool)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            %identity_pool_id,
            succeeded = batch.succeeded.len(),
            failed = batch.failed.len(),
            "accounts created"
        );
        Ok(batch)
    }

    fn remove_accounts(
        &self,
        identity_pool_id: &str,
        names: &[String],
    ) -> PlatformResult<AccountBatch> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut batch = AccountBatch::default();
        {
            let mut accounts = txn.open_table(ACCOUNTS).map_err(map_err!(Table))?;
            for name in names {
                let key = account_key(identity_pool_id, name);
                let removed = accounts
                    .remove(key.as_str())
                    .map_err(map_err!(Write))?
                    .is_some();
                if removed {
                    batch.succeeded.push(Account {
                        name: name.clone(),
                        identity_pool_id: identity_pool_id.to_string(),
                    });
                } else {
                    batch.failed.push(AccountFailure {
                        name: name.clone(),
                        reason: "no such account".to_string(),
                    });
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(batch)
    }

    // ── Tasks ──────────────────────────────────────────────────────

    fn start_create_vms(&self, scheme_id: &str, accounts: &[String]) -> PlatformResult<TaskId> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut items = Vec::new();
        let mut failures = Vec::new();
        {
            let mut schemes = txn.open_table(SCHEMES).map_err(map_err!(Table))?;
            let mut scheme: ProvisioningScheme = read_in(&schemes, scheme_id)?
                .ok_or_else(|| PlatformError::NotFound(format!("provisioning scheme {scheme_id}")))?;
            let identity_pool_id = scheme.identity_pool_id.clone().unwrap_or_default();

            let account_table = txn.open_table(ACCOUNTS).map_err(map_err!(Table))?;
            let mut vms = txn.open_table(VMS).map_err(map_err!(Table))?;
            for account in accounts {
                let reason = if read_in::<Account, _>(&account_table, &account_key(&identity_pool_id, account))?
                    .is_none()
                {
                    Some("unknown identity account")
                } else if read_in::<Vm, _>(&vms, account)?.is_some() {
                    Some("vm already exists")
                } else if scheme.vm_quota == Some(0) {
                    Some("hypervisor capacity exhausted")
                } else {
                    None
                };
                if let Some(reason) = reason {
                    failures.push(TaskFailure {
                        item: account.clone(),
                        reason: reason.to_string(),
                    });
                    continue;
                }

                let vm = Vm {
                    host_name: account.clone(),
                    account_name: account.clone(),
                    scheme_id: scheme_id.to_string(),
                };
                write_in(&mut vms, &vm.host_name, &vm)?;
                if let Some(quota) = scheme.vm_quota.as_mut() {
                    *quota -= 1;
                }
                items.push(TaskItem {
                    host_name: vm.host_name,
                    account_name: vm.account_name,
                });
            }
            write_in(&mut schemes, scheme_id, &scheme)?;
        }
        let id = self.issue_task(&txn, TaskKind::Create, scheme_id, items, failures)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(id)
    }

    fn start_remove_vms(&self, scheme_id: &str, host_names: &[String]) -> PlatformResult<TaskId> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut items = Vec::new();
        let mut failures = Vec::new();
        {
            let schemes = txn.open_table(SCHEMES).map_err(map_err!(Table))?;
            if read_in::<ProvisioningScheme, _>(&schemes, scheme_id)?.is_none() {
                return Err(PlatformError::NotFound(format!("provisioning scheme {scheme_id}")));
            }

            let mut vms = txn.open_table(VMS).map_err(map_err!(Table))?;
            for host in host_names {
                let vm: Option<Vm> = read_in(&vms, host)?;
                match vm {
                    Some(vm) => {
                        vms.remove(host.as_str()).map_err(map_err!(Write))?;
                        items.push(TaskItem {
                            host_name: vm.host_name,
                            account_name: vm.account_name,
                        });
                    }
                    None => failures.push(TaskFailure {
                        item: host.clone(),
                        reason: "no such vm".to_string(),
                    }),
                }
            }
        }
        let id = self.issue_task(&txn, TaskKind::Remove, scheme_id, items, failures)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(id)
    }

    fn get_task(&self, id: &str) -> PlatformResult<Option<Task>> {
        let task: Option<Task> = self.get_json(TASKS, id)?;
        Ok(task.map(|mut t| {
            t.active = epoch_secs() < t.ready_at;
            t
        }))
    }
}

fn read_in<T, R>(table: &R, key: &str) -> PlatformResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let value: T = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn write_in<T: Serialize>(
    table: &mut redb::Table<'_, &'static str, &'static [u8]>,
    key: &str,
    value: &T,
) -> PlatformResult<()> {
    let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
    table
        .insert(key, bytes.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> LocalPlatform {
        let platform = LocalPlatform::open_in_memory().unwrap();
        platform
            .put_pool(&PoolRecord {
                name: "desktops".to_string(),
                session_support: SessionSupport::SingleSession,
                metadata: BTreeMap::new(),
            })
            .unwrap();
        platform
            .put_catalog(&Catalog {
                name: "win11".to_string(),
                physical: false,
                provisioning: ProvisioningType::MachineCreation,
                session_support: SessionSupport::SingleSession,
                provisioning_scheme_id: Some("scheme-1".to_string()),
            })
            .unwrap();
        platform
            .put_provisioning_scheme(&ProvisioningScheme {
                id: "scheme-1".to_string(),
                name: "win11".to_string(),
                identity_pool_id: Some("ids-1".to_string()),
                vm_quota: None,
            })
            .unwrap();
        platform
            .put_identity_pool(&IdentityPool {
                id: "ids-1".to_string(),
                name: "win11".to_string(),
                naming_scheme: Some("VDA-###".to_string()),
                next_index: 1,
                quota: None,
            })
            .unwrap();
        platform
    }

    fn machine(name: &str, pool: Option<&str>, sessions: u32) -> Machine {
        Machine {
            name: name.to_string(),
            host_name: name.to_string(),
            account_name: None,
            catalog: "win11".to_string(),
            pool: pool.map(str::to_string),
            tags: Default::default(),
            session_count: sessions,
            load_index: 0,
        }
    }

    // ── Pools ──────────────────────────────────────────────────────

    #[test]
    fn pool_counts_member_machines_and_sessions() {
        let platform = seeded();
        platform.put_machine(&machine("a", Some("desktops"), 1)).unwrap();
        platform.put_machine(&machine("b", Some("desktops"), 0)).unwrap();
        platform.put_machine(&machine("c", None, 1)).unwrap();

        let pool = platform.get_pool("desktops").unwrap().unwrap();
        assert_eq!(pool.total_capacity, 2);
        assert_eq!(pool.sessions, 1);
        assert!(platform.get_pool("nope").unwrap().is_none());
    }

    #[test]
    fn metadata_merge_and_remove() {
        let platform = seeded();
        let mut entries = BTreeMap::new();
        entries.insert("a".to_string(), "1".to_string());
        entries.insert("b".to_string(), "2".to_string());
        platform.set_pool_metadata("desktops", &entries).unwrap();

        let mut update = BTreeMap::new();
        update.insert("b".to_string(), "3".to_string());
        platform.set_pool_metadata("desktops", &update).unwrap();
        platform.remove_pool_metadata("desktops", &["a", "missing"]).unwrap();

        let pool = platform.get_pool("desktops").unwrap().unwrap();
        assert_eq!(pool.metadata.len(), 1);
        assert_eq!(pool.metadata["b"], "3");
    }

    #[test]
    fn metadata_on_missing_pool_is_not_found() {
        let platform = seeded();
        let err = platform
            .set_pool_metadata("nope", &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, PlatformError::NotFound(_)));
    }

    // ── Machines ───────────────────────────────────────────────────

    #[test]
    fn machine_query_filters() {
        let platform = seeded();
        platform.create_tag("owned").unwrap();
        platform.put_machine(&machine("a", Some("desktops"), 0)).unwrap();
        platform.put_machine(&machine("b", Some("desktops"), 2)).unwrap();
        platform.tag_machine("a", "owned").unwrap();
        platform.tag_machine("b", "owned").unwrap();

        let idle = platform
            .list_machines(&MachineQuery::default().in_pool("desktops").tagged("owned").with_sessions(0))
            .unwrap();
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].name, "a");

        let by_host = platform.list_machines(&MachineQuery::default().host("B")).unwrap();
        assert_eq!(by_host.len(), 1);
    }

    #[test]
    fn tagging_requires_existing_tag() {
        let platform = seeded();
        platform.put_machine(&machine("a", None, 0)).unwrap();
        let err = platform.tag_machine("a", "ghost").unwrap_err();
        assert!(matches!(err, PlatformError::NotFound(_)));
    }

    #[test]
    fn pool_membership_conflicts() {
        let platform = seeded();
        platform
            .put_pool(&PoolRecord {
                name: "other".to_string(),
                session_support: SessionSupport::SingleSession,
                metadata: BTreeMap::new(),
            })
            .unwrap();
        platform.put_machine(&machine("a", None, 0)).unwrap();

        platform.add_to_pool("desktops", "a").unwrap();
        // Re-adding to the same pool is harmless.
        platform.add_to_pool("desktops", "a").unwrap();
        assert!(matches!(
            platform.add_to_pool("other", "a").unwrap_err(),
            PlatformError::Conflict(_)
        ));
        assert!(matches!(
            platform.remove_from_pool("other", "a").unwrap_err(),
            PlatformError::NotFound(_)
        ));
        platform.remove_from_pool("desktops", "a").unwrap();
        platform.remove_machine("a").unwrap();
        assert!(platform.remove_machine("a").is_err());
    }

    // ── Accounts ───────────────────────────────────────────────────

    #[test]
    fn accounts_follow_naming_scheme() {
        let platform = seeded();
        let batch = platform.create_accounts("ids-1", 3).unwrap();
        let names: Vec<_> = batch.succeeded.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["VDA-001", "VDA-002", "VDA-003"]);
        assert!(batch.failed.is_empty());

        let next = platform.create_accounts("ids-1", 1).unwrap();
        assert_eq!(next.succeeded[0].name, "VDA-004");
    }

    #[test]
    fn account_quota_produces_partial_failures() {
        let platform = seeded();
        let mut ids = platform.get_identity_pool("ids-1").unwrap().unwrap();
        ids.quota = Some(2);
        platform.put_identity_pool(&ids).unwrap();

        let batch = platform.create_accounts("ids-1", 3).unwrap();
        assert_eq!(batch.succeeded.len(), 2);
        assert_eq!(batch.failed.len(), 1);
        assert_eq!(batch.failed[0].name, "VDA-003");
    }

    #[test]
    fn identity_pool_without_naming_scheme_is_rejected() {
        let platform = seeded();
        let mut ids = platform.get_identity_pool("ids-1").unwrap().unwrap();
        ids.naming_scheme = None;
        platform.put_identity_pool(&ids).unwrap();

        assert!(matches!(
            platform.create_accounts("ids-1", 1).unwrap_err(),
            PlatformError::Rejected(_)
        ));
    }

    #[test]
    fn remove_accounts_reports_unknown_names() {
        let platform = seeded();
        platform.create_accounts("ids-1", 1).unwrap();
        let batch = platform
            .remove_accounts("ids-1", &["VDA-001".to_string(), "VDA-999".to_string()])
            .unwrap();
        assert_eq!(batch.succeeded.len(), 1);
        assert_eq!(batch.failed[0].name, "VDA-999");
        assert!(platform.list_accounts("ids-1").unwrap().is_empty());
    }

    // ── Tasks ──────────────────────────────────────────────────────

    #[test]
    fn create_task_builds_vms_and_completes_without_latency() {
        let platform = seeded();
        let names: Vec<String> = platform
            .create_accounts("ids-1", 2)
            .unwrap()
            .succeeded
            .into_iter()
            .map(|a| a.name)
            .collect();

        let id = platform.start_create_vms("scheme-1", &names).unwrap();
        let task = platform.get_task(&id).unwrap().unwrap();
        assert_eq!(task.kind, TaskKind::Create);
        assert!(!task.active);
        assert_eq!(task.items.len(), 2);
        assert_eq!(platform.list_vms().unwrap().len(), 2);

        let machine = platform.register_machine("win11", "VDA-001").unwrap();
        assert_eq!(machine.account_name.as_deref(), Some("VDA-001"));
        assert!(matches!(
            platform.register_machine("win11", "VDA-001").unwrap_err(),
            PlatformError::Conflict(_)
        ));
    }

    #[test]
    fn create_task_respects_vm_quota() {
        let platform = seeded();
        let mut scheme = platform.get_provisioning_scheme("scheme-1").unwrap().unwrap();
        scheme.vm_quota = Some(0);
        platform.put_provisioning_scheme(&scheme).unwrap();
        platform.create_accounts("ids-1", 1).unwrap();

        let id = platform
            .start_create_vms("scheme-1", &["VDA-001".to_string()])
            .unwrap();
        let task = platform.get_task(&id).unwrap().unwrap();
        assert!(task.items.is_empty());
        assert_eq!(task.failures[0].reason, "hypervisor capacity exhausted");
    }

    #[test]
    fn task_stays_active_until_latency_or_finish() {
        let platform = seeded().with_task_latency(Duration::from_secs(3600));
        platform.create_accounts("ids-1", 1).unwrap();
        let id = platform
            .start_create_vms("scheme-1", &["VDA-001".to_string()])
            .unwrap();
        assert!(platform.get_task(&id).unwrap().unwrap().active);

        platform.finish_task(&id).unwrap();
        assert!(!platform.get_task(&id).unwrap().unwrap().active);
    }

    #[test]
    fn remove_task_carries_account_names() {
        let platform = seeded();
        platform.create_accounts("ids-1", 1).unwrap();
        platform
            .start_create_vms("scheme-1", &["VDA-001".to_string()])
            .unwrap();

        let id = platform
            .start_remove_vms("scheme-1", &["VDA-001".to_string(), "ghost".to_string()])
            .unwrap();
        let task = platform.get_task(&id).unwrap().unwrap();
        assert_eq!(task.kind, TaskKind::Remove);
        assert_eq!(task.items[0].account_name, "VDA-001");
        assert_eq!(task.failures[0].item, "ghost");
        assert!(platform.get_vm("VDA-001").unwrap().is_none());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("platform.redb");

        {
            let platform = LocalPlatform::open(&db_path).unwrap();
            platform
                .put_pool(&PoolRecord {
                    name: "desktops".to_string(),
                    session_support: SessionSupport::MultiSession,
                    metadata: BTreeMap::new(),
                })
                .unwrap();
        }

        let platform = LocalPlatform::open(&db_path).unwrap();
        let pool = platform.get_pool("desktops").unwrap().unwrap();
        assert_eq!(pool.session_support, SessionSupport::MultiSession);
    }
}
