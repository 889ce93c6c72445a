//! Autoscaler configuration.
//!
//! A pool's [`ScaleConfig`] is resolved once, before any state handler runs,
//! from three sources: what is already stored in the pool's metadata, the
//! invocation's [`ConfigUpdate`], and the operator's [`Defaults`]. Every
//! check returns a typed [`ConfigError`]; nothing is written until the whole
//! configuration is valid.

use poolscale_platform::{Platform, Pool, ProvisioningType};
use tracing::debug;

use crate::error::{ConfigError, ScaleResult};

/// Load thresholds in percent. `1 <= low < high <= 100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    high: u8,
    low: u8,
}

impl Watermarks {
    pub fn new(high: i64, low: i64) -> Result<Self, ConfigError> {
        let high = percent(high)?;
        let low = percent(low)?;
        if low >= high {
            return Err(ConfigError::WatermarkOrder { high, low });
        }
        Ok(Self { high, low })
    }

    /// Validate an optional pair: both or neither.
    pub fn from_pair(high: Option<i64>, low: Option<i64>) -> Result<Option<Self>, ConfigError> {
        match (high, low) {
            (Some(high), Some(low)) => Self::new(high, low).map(Some),
            (None, None) => Ok(None),
            _ => Err(ConfigError::IncompleteWatermarks),
        }
    }

    pub fn high(&self) -> u8 {
        self.high
    }

    pub fn low(&self) -> u8 {
        self.low
    }
}

fn percent(value: i64) -> Result<u8, ConfigError> {
    match u8::try_from(value) {
        Ok(p) if (1..=100).contains(&p) => Ok(p),
        _ => Err(ConfigError::WatermarkRange(value)),
    }
}

/// `maxMachines <= 0` means unbounded.
pub fn normalize_max_machines(value: i64) -> Option<u32> {
    if value <= 0 {
        None
    } else {
        Some(u32::try_from(value).unwrap_or(u32::MAX))
    }
}

/// Operator-wide fallbacks applied when a pool is initialized.
#[derive(Debug, Clone, PartialEq)]
pub struct Defaults {
    pub watermarks: Watermarks,
    /// Appended to the pool name to form the default ownership tag.
    pub tag_suffix: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            watermarks: Watermarks { high: 80, low: 20 },
            tag_suffix: "-autoscale".to_string(),
        }
    }
}

impl Defaults {
    pub fn tag_for(&self, pool: &str) -> String {
        format!("{pool}{}", self.tag_suffix)
    }
}

/// Configuration-mutating parameters supplied with an invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigUpdate {
    pub watermarks: Option<Watermarks>,
    /// Raw cap; `<= 0` clears it.
    pub max_machines: Option<i64>,
    pub catalog: Option<String>,
    pub tag: Option<String>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.watermarks.is_none()
            && self.max_machines.is_none()
            && self.catalog.is_none()
            && self.tag.is_none()
    }
}

/// Where new machines come from, validated against the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineSource {
    pub catalog_name: String,
    pub provisioning_scheme_id: String,
    pub identity_pool_id: String,
}

/// A pool's resolved, immutable scaling configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleConfig {
    pub tag: String,
    pub source: MachineSource,
    pub watermarks: Watermarks,
    pub max_machines: Option<u32>,
}

impl ScaleConfig {
    /// Configuration for a pool seen for the first time.
    pub fn initial(
        pool: &Pool,
        source: MachineSource,
        update: &ConfigUpdate,
        defaults: &Defaults,
    ) -> Result<Self, ConfigError> {
        let tag = match &update.tag {
            Some(tag) => validate_tag(tag)?,
            None => defaults.tag_for(&pool.name),
        };
        Ok(Self {
            tag,
            source,
            watermarks: update.watermarks.unwrap_or(defaults.watermarks),
            max_machines: update.max_machines.and_then(normalize_max_machines),
        })
    }

    /// Apply an update to an existing configuration. `source` is the
    /// re-validated machine source when the update names a catalog.
    pub fn updated(
        &self,
        update: &ConfigUpdate,
        source: Option<MachineSource>,
    ) -> Result<Self, ConfigError> {
        let mut next = self.clone();
        if let Some(watermarks) = update.watermarks {
            next.watermarks = watermarks;
        }
        if let Some(max) = update.max_machines {
            next.max_machines = normalize_max_machines(max);
        }
        if let Some(source) = source {
            next.source = source;
        }
        if let Some(tag) = &update.tag {
            next.tag = validate_tag(tag)?;
        }
        Ok(next)
    }
}

fn validate_tag(tag: &str) -> Result<String, ConfigError> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(ConfigError::EmptyTag);
    }
    Ok(tag.to_string())
}

/// Check that `catalog` can supply machines for `pool`.
///
/// The catalog must hold virtual machines created by machine-creation
/// provisioning, match the pool's session support, and resolve to a
/// provisioning scheme whose identity pool has a naming scheme.
pub fn resolve_machine_source<P: Platform>(
    platform: &P,
    pool: &Pool,
    catalog: &str,
) -> ScaleResult<MachineSource> {
    let found = platform
        .get_catalog(catalog)?
        .ok_or_else(|| ConfigError::CatalogNotFound(catalog.to_string()))?;

    if found.physical {
        return Err(ConfigError::PhysicalCatalog(found.name).into());
    }
    if found.provisioning != ProvisioningType::MachineCreation {
        return Err(ConfigError::ProvisioningType {
            catalog: found.name,
            found: found.provisioning,
        }
        .into());
    }
    if found.session_support != pool.session_support {
        return Err(ConfigError::SessionSupport {
            catalog: found.name,
            catalog_mode: found.session_support,
            pool_mode: pool.session_support,
        }
        .into());
    }

    let scheme_id = found
        .provisioning_scheme_id
        .clone()
        .ok_or_else(|| ConfigError::NoProvisioningScheme(found.name.clone()))?;
    let scheme = platform
        .get_provisioning_scheme(&scheme_id)?
        .ok_or_else(|| ConfigError::SchemeNotFound(scheme_id.clone()))?;
    let identity_pool_id = scheme
        .identity_pool_id
        .clone()
        .ok_or_else(|| ConfigError::NoIdentityPool(scheme.id.clone()))?;
    let identity_pool = platform
        .get_identity_pool(&identity_pool_id)?
        .ok_or_else(|| ConfigError::IdentityPoolNotFound(identity_pool_id.clone()))?;
    if identity_pool
        .naming_scheme
        .as_deref()
        .is_none_or(|s| s.trim().is_empty())
    {
        return Err(ConfigError::NoNamingScheme(identity_pool.id).into());
    }

    debug!(%catalog, %scheme_id, %identity_pool_id, "machine source validated");
    Ok(MachineSource {
        catalog_name: found.name,
        provisioning_scheme_id: scheme_id,
        identity_pool_id,
    })
}
