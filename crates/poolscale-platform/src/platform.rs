//! The platform API consumed by the autoscaler.
//!
//! Every call is a synchronous, non-blocking request from the caller's point
//! of view. Long-running work (VM creation and removal) is started with
//! `start_*` and observed later through [`Platform::get_task`]; nothing here
//! waits for completion.

use std::collections::BTreeMap;

use crate::error::PlatformResult;
use crate::types::*;

pub trait Platform {
    // ── Pools ──────────────────────────────────────────────────────

    /// Look up a pool with its current capacity and session counts.
    fn get_pool(&self, name: &str) -> PlatformResult<Option<Pool>>;

    /// Merge `entries` into the pool's annotation map.
    fn set_pool_metadata(&self, pool: &str, entries: &BTreeMap<String, String>)
        -> PlatformResult<()>;

    /// Remove `keys` from the pool's annotation map. Missing keys are ignored.
    fn remove_pool_metadata(&self, pool: &str, keys: &[&str]) -> PlatformResult<()>;

    // ── Machines ───────────────────────────────────────────────────

    fn list_machines(&self, query: &MachineQuery) -> PlatformResult<Vec<Machine>>;

    /// Create a machine record in `catalog` for an existing VM.
    fn register_machine(&self, catalog: &str, host_name: &str) -> PlatformResult<Machine>;

    /// Remove a machine record from the directory. The VM is left alone.
    fn remove_machine(&self, machine: &str) -> PlatformResult<()>;

    fn tag_machine(&self, machine: &str, tag: &str) -> PlatformResult<()>;

    fn add_to_pool(&self, pool: &str, machine: &str) -> PlatformResult<()>;

    fn remove_from_pool(&self, pool: &str, machine: &str) -> PlatformResult<()>;

    // ── Tags ───────────────────────────────────────────────────────

    fn get_tag(&self, name: &str) -> PlatformResult<Option<Tag>>;

    fn create_tag(&self, name: &str) -> PlatformResult<Tag>;

    // ── Machine sources ────────────────────────────────────────────

    fn get_catalog(&self, name: &str) -> PlatformResult<Option<Catalog>>;

    fn get_provisioning_scheme(&self, id: &str) -> PlatformResult<Option<ProvisioningScheme>>;

    fn get_identity_pool(&self, id: &str) -> PlatformResult<Option<IdentityPool>>;

    // ── Identity accounts ──────────────────────────────────────────

    /// Create `count` new accounts named by the identity pool's naming scheme.
    fn create_accounts(&self, identity_pool_id: &str, count: u32) -> PlatformResult<AccountBatch>;

    /// Hard-delete the named accounts.
    fn remove_accounts(&self, identity_pool_id: &str, names: &[String])
        -> PlatformResult<AccountBatch>;

    // ── Tasks ──────────────────────────────────────────────────────

    /// Start creating one VM per account.
    fn start_create_vms(&self, scheme_id: &str, accounts: &[String]) -> PlatformResult<TaskId>;

    /// Start deleting the VMs with the given host names.
    fn start_remove_vms(&self, scheme_id: &str, host_names: &[String]) -> PlatformResult<TaskId>;

    fn get_task(&self, id: &str) -> PlatformResult<Option<Task>>;
}
