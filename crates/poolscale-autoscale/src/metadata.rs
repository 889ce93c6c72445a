//! The persisted metadata record.
//!
//! The record lives in the pool's own annotation map as string key/value
//! pairs, one key per field, all prefixed with `PoolScale.`. Optional fields
//! that are unset are removed from the map rather than stored empty.

use std::collections::BTreeMap;

use poolscale_platform::TaskId;
use serde::{Deserialize, Serialize};

use crate::config::{MachineSource, ScaleConfig, Watermarks, normalize_max_machines};
use crate::error::{ScaleError, ScaleResult};
use crate::state::ScaleState;

/// Annotation keys.
pub mod keys {
    pub const STATE: &str = "PoolScale.State";
    pub const CLEAN_EXIT: &str = "PoolScale.CleanExit";
    pub const TAG: &str = "PoolScale.Tag";
    pub const CATALOG_NAME: &str = "PoolScale.CatalogName";
    pub const IDENTITY_POOL_ID: &str = "PoolScale.IdentityPoolId";
    pub const PROVISIONING_SCHEME_ID: &str = "PoolScale.ProvisioningSchemeId";
    pub const HIGH_WATERMARK: &str = "PoolScale.HighWatermark";
    pub const LOW_WATERMARK: &str = "PoolScale.LowWatermark";
    pub const MAX_MACHINES: &str = "PoolScale.MaxMachines";
    pub const PENDING_TASK_ID: &str = "PoolScale.PendingTaskId";
    pub const ACTIONS_TAKEN: &str = "PoolScale.ActionsTaken";
    pub const LAST_UPDATE_TIME: &str = "PoolScale.LastUpdateTime";
    pub const OBSERVED_LOAD: &str = "PoolScale.ObservedLoad";
    pub const CHECKPOINT: &str = "PoolScale.Checkpoint";
}

/// Progress through a two-step mutation, recorded between the steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Checkpoint {
    /// Created VMs are registered and tagged; pool membership is next.
    Registered { machines: Vec<String> },
    /// Idle machines chosen for removal, by machine name with their host
    /// names. Recorded before any of them leaves the pool.
    Unassigning { machines: BTreeMap<String, String> },
    /// Idle machines left the pool and the directory; VM deletion is next.
    Unassigned { hosts: Vec<String> },
}

/// Everything the autoscaler persists about one pool.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    pub state: ScaleState,
    pub clean_exit: bool,
    pub config: ScaleConfig,
    pub pending_task_id: Option<TaskId>,
    /// Machines being added or removed by the in-flight task.
    pub actions_taken: u32,
    /// Unix timestamp (seconds) of the last pool membership change.
    pub last_update_time: Option<u64>,
    /// Load percentage that triggered the last scale decision.
    pub observed_load: Option<f64>,
    pub checkpoint: Option<Checkpoint>,
}

impl MetadataRecord {
    /// A freshly initialized record.
    pub fn new(config: ScaleConfig) -> Self {
        Self {
            state: ScaleState::MonitorUsage,
            clean_exit: false,
            config,
            pending_task_id: None,
            actions_taken: 0,
            last_update_time: None,
            observed_load: None,
            checkpoint: None,
        }
    }

    /// Parse the record out of a pool's annotation map.
    ///
    /// Returns `Ok(None)` when the pool has never been initialized (no state
    /// key). Any other missing or malformed field is an error.
    pub fn from_metadata(map: &BTreeMap<String, String>) -> ScaleResult<Option<Self>> {
        let Some(raw_state) = map.get(keys::STATE) else {
            return Ok(None);
        };
        let state = raw_state
            .parse::<ScaleState>()
            .map_err(|e| corrupt(keys::STATE, raw_state, e))?;

        let high = parse_required::<i64>(map, keys::HIGH_WATERMARK)?;
        let low = parse_required::<i64>(map, keys::LOW_WATERMARK)?;
        let watermarks = Watermarks::new(high, low).map_err(|e| ScaleError::CorruptMetadata {
            key: keys::HIGH_WATERMARK,
            value: format!("{high}/{low}"),
            reason: e.to_string(),
        })?;

        let config = ScaleConfig {
            tag: required(map, keys::TAG)?.to_string(),
            source: MachineSource {
                catalog_name: required(map, keys::CATALOG_NAME)?.to_string(),
                provisioning_scheme_id: required(map, keys::PROVISIONING_SCHEME_ID)?.to_string(),
                identity_pool_id: required(map, keys::IDENTITY_POOL_ID)?.to_string(),
            },
            watermarks,
            max_machines: parse_optional::<i64>(map, keys::MAX_MACHINES)?
                .and_then(normalize_max_machines),
        };

        let checkpoint = match map.get(keys::CHECKPOINT) {
            Some(raw) => Some(
                serde_json::from_str::<Checkpoint>(raw)
                    .map_err(|e| corrupt(keys::CHECKPOINT, raw, e))?,
            ),
            None => None,
        };

        Ok(Some(Self {
            state,
            clean_exit: parse_optional::<bool>(map, keys::CLEAN_EXIT)?.unwrap_or(false),
            config,
            pending_task_id: map
                .get(keys::PENDING_TASK_ID)
                .filter(|id| !id.is_empty())
                .cloned(),
            actions_taken: parse_optional::<u32>(map, keys::ACTIONS_TAKEN)?.unwrap_or(0),
            last_update_time: parse_optional::<u64>(map, keys::LAST_UPDATE_TIME)?,
            observed_load: parse_optional::<f64>(map, keys::OBSERVED_LOAD)?,
            checkpoint,
        }))
    }

    /// Fields to write, and optional fields to clear.
    pub fn to_metadata(&self) -> ScaleResult<(BTreeMap<String, String>, Vec<&'static str>)> {
        let mut entries = BTreeMap::new();
        let mut cleared = Vec::new();
        let mut put = |key: &'static str, value: String| {
            entries.insert(key.to_string(), value);
        };

        put(keys::STATE, self.state.to_string());
        put(keys::CLEAN_EXIT, self.clean_exit.to_string());
        put(keys::TAG, self.config.tag.clone());
        put(keys::CATALOG_NAME, self.config.source.catalog_name.clone());
        put(keys::IDENTITY_POOL_ID, self.config.source.identity_pool_id.clone());
        put(
            keys::PROVISIONING_SCHEME_ID,
            self.config.source.provisioning_scheme_id.clone(),
        );
        put(keys::HIGH_WATERMARK, self.config.watermarks.high().to_string());
        put(keys::LOW_WATERMARK, self.config.watermarks.low().to_string());
        put(
            keys::MAX_MACHINES,
            self.config.max_machines.map_or(0, i64::from).to_string(),
        );
        put(keys::ACTIONS_TAKEN, self.actions_taken.to_string());

        match &self.pending_task_id {
            Some(id) => put(keys::PENDING_TASK_ID, id.clone()),
            None => cleared.push(keys::PENDING_TASK_ID),
        }
        match self.last_update_time {
            Some(t) => put(keys::LAST_UPDATE_TIME, t.to_string()),
            None => cleared.push(keys::LAST_UPDATE_TIME),
        }
        match self.observed_load {
            Some(load) => put(keys::OBSERVED_LOAD, load.to_string()),
            None => cleared.push(keys::OBSERVED_LOAD),
        }
        match &self.checkpoint {
            Some(checkpoint) => {
                let raw = serde_json::to_string(checkpoint).map_err(|e| {
                    ScaleError::CorruptMetadata {
                        key: keys::CHECKPOINT,
                        value: format!("{checkpoint:?}"),
                        reason: e.to_string(),
                    }
                })?;
                put(keys::CHECKPOINT, raw);
            }
            None => cleared.push(keys::CHECKPOINT),
        }

        Ok((entries, cleared))
    }

    /// Forget the in-flight task.
    pub fn clear_pending(&mut self) {
        self.pending_task_id = None;
        self.actions_taken = 0;
    }
}

fn corrupt(key: &'static str, value: &str, reason: impl std::fmt::Display) -> ScaleError {
    ScaleError::CorruptMetadata {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn required<'a>(map: &'a BTreeMap<String, String>, key: &'static str) -> ScaleResult<&'a str> {
    map.get(key)
        .map(String::as_str)
        .ok_or(ScaleError::MissingMetadata(key))
}

fn parse_required<T>(map: &BTreeMap<String, String>, key: &'static str) -> ScaleResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = required(map, key)?;
    raw.trim().parse().map_err(|e| corrupt(key, raw, e))
}

fn parse_optional<T>(map: &BTreeMap<String, String>, key: &'static str) -> ScaleResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match map.get(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map(Some).map_err(|e| corrupt(key, raw, e))
        }
        _ => Ok(None),
    }
}
