//! Declarative description of a local platform, loaded from TOML.
//!
//! ```toml
//! [[catalogs]]
//! name = "win11"
//! provisioning = "machine_creation"
//! session_support = "single_session"
//! provisioning_scheme_id = "scheme-win11"
//!
//! [[provisioning_schemes]]
//! id = "scheme-win11"
//! name = "win11"
//! identity_pool_id = "ids-win11"
//!
//! [[identity_pools]]
//! id = "ids-win11"
//! name = "win11"
//! naming_scheme = "VDA-###"
//!
//! [[pools]]
//! name = "desktops"
//! session_support = "single_session"
//!
//! [[pools.machines]]
//! name = "VDA-STATIC-1"
//! catalog = "win11"
//! sessions = 1
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use tracing::info;

use crate::error::PlatformResult;
use crate::store::LocalPlatform;
use crate::types::*;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformFixture {
    #[serde(default)]
    pub catalogs: Vec<Catalog>,
    #[serde(default)]
    pub provisioning_schemes: Vec<ProvisioningScheme>,
    #[serde(default)]
    pub identity_pools: Vec<IdentityPool>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub pools: Vec<PoolFixture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolFixture {
    pub name: String,
    pub session_support: SessionSupport,
    #[serde(default)]
    pub machines: Vec<MachineFixture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MachineFixture {
    pub name: String,
    pub catalog: String,
    #[serde(default)]
    pub sessions: u32,
    #[serde(default)]
    pub load_index: u32,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl LocalPlatform {
    /// Write every object in `fixture`, overwriting records with the same key.
    ///
    /// Existing pool annotations are preserved so reseeding does not wipe the
    /// autoscaler's persisted state.
    pub fn seed(&self, fixture: &PlatformFixture) -> PlatformResult<()> {
        use crate::Platform;

        for catalog in &fixture.catalogs {
            self.put_catalog(catalog)?;
        }
        for scheme in &fixture.provisioning_schemes {
            self.put_provisioning_scheme(scheme)?;
        }
        for identity_pool in &fixture.identity_pools {
            self.put_identity_pool(identity_pool)?;
        }
        for tag in &fixture.tags {
            if self.get_tag(tag)?.is_none() {
                self.create_tag(tag)?;
            }
        }

        let mut machines = 0;
        for pool in &fixture.pools {
            let metadata = self
                .get_pool(&pool.name)?
                .map(|p| p.metadata)
                .unwrap_or_else(BTreeMap::new);
            self.put_pool(&PoolRecord {
                name: pool.name.clone(),
                session_support: pool.session_support,
                metadata,
            })?;

            for m in &pool.machines {
                self.put_machine(&Machine {
                    name: m.name.clone(),
                    host_name: m.name.clone(),
                    account_name: None,
                    catalog: m.catalog.clone(),
                    pool: Some(pool.name.clone()),
                    tags: m.tags.clone(),
                    session_count: m.sessions,
                    load_index: m.load_index.min(MAX_LOAD_INDEX),
                })?;
                machines += 1;
            }
        }

        info!(
            catalogs = fixture.catalogs.len(),
            pools = fixture.pools.len(),
            machines,
            "platform seeded"
        );
        Ok(())
    }
}
