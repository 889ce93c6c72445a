//! redb table definitions for the local platform.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Pool records keyed by pool name.
pub const POOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("pools");

/// Machine records keyed by machine name.
pub const MACHINES: TableDefinition<&str, &[u8]> = TableDefinition::new("machines");

/// Catalogs keyed by catalog name.
pub const CATALOGS: TableDefinition<&str, &[u8]> = TableDefinition::new("catalogs");

/// Provisioning schemes keyed by scheme id.
pub const SCHEMES: TableDefinition<&str, &[u8]> = TableDefinition::new("provisioning_schemes");

/// Identity pools keyed by identity pool id.
pub const IDENTITY_POOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("identity_pools");

/// Identity accounts keyed by `{identity_pool_id}/{name}`.
pub const ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("accounts");

/// Tags keyed by tag name.
pub const TAGS: TableDefinition<&str, &[u8]> = TableDefinition::new("tags");

/// Provisioned VMs keyed by host name.
pub const VMS: TableDefinition<&str, &[u8]> = TableDefinition::new("vms");

/// Asynchronous tasks keyed by task id.
pub const TASKS: TableDefinition<&str, &[u8]> = TableDefinition::new("tasks");
