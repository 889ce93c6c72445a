//! poolscale-autoscale — watermark-driven pool scaling.
//!
//! Each invocation loads a pool's persisted [`MetadataRecord`], runs exactly
//! one state handler, and writes the next state back to the pool's
//! annotation map. Waiting on the platform's asynchronous VM tasks is done by
//! returning and being invoked again later; no handler sleeps or loops.
//!
//! # State machine
//!
//! ```text
//! (absent) ──init──▶ MonitorUsage
//!
//! MonitorUsage          ──load > high──▶ ProvisionMachines
//!                       ──load < low───▶ RemoveMachines
//! ProvisionMachines     ──task issued──▶ MonitorProvision
//! MonitorProvision      ──task done────▶ AddMachines
//! AddMachines           ───────────────▶ MonitorUsage
//! RemoveMachines        ──task issued──▶ MonitorDeleteMachines
//! MonitorDeleteMachines ──task done────▶ MonitorUsage
//! ```
//!
//! Every non-`MonitorUsage` state may also fall back to `MonitorUsage` when
//! there is nothing (left) to do.
//!
//! # Load
//!
//! ```text
//! single-session: load = sessions * 100 / capacity
//! multi-session:  load = sum(load_index) * 100 / (10000 * machines)
//!
//! needed (single) = ceil(100 * sessions / high - capacity)
//! needed (multi)  = ceil(sum(load_index) / 100 / high - machines)
//! ```

pub mod config;
pub mod error;
mod handlers;
pub mod load;
pub mod metadata;
pub mod scaler;
pub mod state;

pub use config::{ConfigUpdate, Defaults, MachineSource, ScaleConfig, Watermarks};
pub use error::{ConfigError, ScaleError, ScaleResult};
pub use load::LoadSample;
pub use metadata::{Checkpoint, MetadataRecord};
pub use scaler::{Autoscaler, PoolOutcome};
pub use state::ScaleState;
