//! Domain types exchanged with the platform.
//!
//! These mirror what an orchestration platform exposes: pools and their
//! annotation maps, machine records, catalogs, provisioning schemes, identity
//! pools and accounts, tags, and asynchronous VM tasks. All types are
//! serializable to/from JSON for storage in redb tables.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Opaque handle of an asynchronous platform task.
pub type TaskId = String;

/// Fixed per-machine maximum load index reported by the platform.
pub const MAX_LOAD_INDEX: u32 = 10_000;

// ── Pools ─────────────────────────────────────────────────────────

/// Whether machines in a pool host one or many user sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSupport {
    SingleSession,
    MultiSession,
}

/// Persisted pool record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolRecord {
    pub name: String,
    pub session_support: SessionSupport,
    /// Platform-provided key/value annotation map.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A pool as reported by [`Platform::get_pool`](crate::Platform::get_pool).
#[derive(Debug, Clone, PartialEq)]
pub struct Pool {
    pub name: String,
    pub session_support: SessionSupport,
    /// Number of machines that are members of the pool.
    pub total_capacity: u32,
    /// Active sessions across all member machines.
    pub sessions: u32,
    pub metadata: BTreeMap<String, String>,
}

// ── Machines ──────────────────────────────────────────────────────

/// A machine record in the platform's machine directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Machine {
    pub name: String,
    /// Hypervisor-side name of the underlying VM.
    pub host_name: String,
    /// Identity account bound to this machine, if any.
    #[serde(default)]
    pub account_name: Option<String>,
    pub catalog: String,
    /// Pool membership.
    #[serde(default)]
    pub pool: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub session_count: u32,
    /// Current load, 0..=[`MAX_LOAD_INDEX`].
    #[serde(default)]
    pub load_index: u32,
}

/// Filter for [`Platform::list_machines`](crate::Platform::list_machines).
///
/// Every `Some` field must match; `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineQuery {
    pub pool: Option<String>,
    pub tag: Option<String>,
    pub session_count: Option<u32>,
    pub host_name: Option<String>,
}

impl MachineQuery {
    pub fn in_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_sessions(mut self, count: u32) -> Self {
        self.session_count = Some(count);
        self
    }

    pub fn host(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = Some(host_name.into());
        self
    }

    /// Whether `machine` satisfies every filter in this query.
    pub fn matches(&self, machine: &Machine) -> bool {
        if let Some(pool) = &self.pool
            && machine.pool.as_deref() != Some(pool.as_str())
        {
            return false;
        }
        if let Some(tag) = &self.tag
            && !machine.tags.contains(tag)
        {
            return false;
        }
        if let Some(count) = self.session_count
            && machine.session_count != count
        {
            return false;
        }
        if let Some(host) = &self.host_name
            && !machine.host_name.eq_ignore_ascii_case(host)
        {
            return false;
        }
        true
    }
}

// ── Machine sources ───────────────────────────────────────────────

/// Technology used to provision a catalog's machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningType {
    /// Machines cloned from a master image by the platform.
    MachineCreation,
    /// Machines streamed from a shared disk image.
    Streaming,
    /// Machines added by hand.
    Manual,
}

/// A machine catalog: the source new machines are drawn from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Catalog {
    pub name: String,
    #[serde(default)]
    pub physical: bool,
    pub provisioning: ProvisioningType,
    pub session_support: SessionSupport,
    #[serde(default)]
    pub provisioning_scheme_id: Option<String>,
}

/// Template describing how VMs for a catalog are created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisioningScheme {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub identity_pool_id: Option<String>,
    /// Remaining VMs the hypervisor will accept; `None` is unlimited.
    #[serde(default)]
    pub vm_quota: Option<u32>,
}

/// Source of identity accounts for newly provisioned machines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityPool {
    pub id: String,
    pub name: String,
    /// Account naming pattern; a run of `#` is replaced by a zero-padded index.
    #[serde(default)]
    pub naming_scheme: Option<String>,
    #[serde(default = "default_next_index")]
    pub next_index: u32,
    /// Remaining accounts the directory will accept; `None` is unlimited.
    #[serde(default)]
    pub quota: Option<u32>,
}

fn default_next_index() -> u32 {
    1
}

impl IdentityPool {
    /// Expand the naming scheme for `index`, if one is configured.
    pub fn account_name(&self, index: u32) -> Option<String> {
        let scheme = self.naming_scheme.as_deref()?;
        let start = scheme.find('#')?;
        let width = scheme[start..].chars().take_while(|c| *c == '#').count();
        Some(format!(
            "{}{:0width$}{}",
            &scheme[..start],
            index,
            &scheme[start + width..],
        ))
    }
}

// ── Identity accounts ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub name: String,
    pub identity_pool_id: String,
}

impl Account {
    /// Build the composite key for the accounts table.
    pub fn table_key(&self) -> String {
        account_key(&self.identity_pool_id, &self.name)
    }
}

pub(crate) fn account_key(identity_pool_id: &str, name: &str) -> String {
    format!("{identity_pool_id}/{name}")
}

/// An account that could not be created or removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountFailure {
    pub name: String,
    pub reason: String,
}

/// Per-item outcome of a bulk account operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountBatch {
    pub succeeded: Vec<Account>,
    pub failed: Vec<AccountFailure>,
}

// ── Tags ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    pub name: String,
    /// Unix timestamp (seconds) when the tag was created.
    pub created_at: u64,
}

// ── VMs and tasks ─────────────────────────────────────────────────

/// A VM that exists on the hypervisor, registered or not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vm {
    pub host_name: String,
    pub account_name: String,
    pub scheme_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Create,
    Remove,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Create => f.write_str("create"),
            TaskKind::Remove => f.write_str("remove"),
        }
    }
}

/// A VM created or removed by a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskItem {
    pub host_name: String,
    pub account_name: String,
}

/// A VM the task could not create or remove.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskFailure {
    pub item: String,
    pub reason: String,
}

/// A long-running VM create/remove operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub scheme_id: String,
    /// Unix timestamp (seconds) when the task was issued.
    pub issued_at: u64,
    /// Unix timestamp (seconds) from which the task reports complete.
    pub ready_at: u64,
    /// Whether the task is still running, as of the last read.
    pub active: bool,
    pub items: Vec<TaskItem>,
    #[serde(default)]
    pub failures: Vec<TaskFailure>,
}
