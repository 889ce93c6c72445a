//! Pool load measurement.

use poolscale_platform::{MAX_LOAD_INDEX, MachineQuery, Platform, Pool, SessionSupport};

use crate::error::ScaleResult;

/// A point-in-time load reading for one pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadSample {
    /// One user per machine: load is the share of machines in use.
    SingleSession { sessions: u32, capacity: u32 },
    /// Many users per machine: load is the mean of the machines' load indexes.
    MultiSession { total_load: u64, machines: u32 },
}

impl LoadSample {
    /// Read the current load of `pool`.
    pub fn read<P: Platform>(platform: &P, pool: &Pool) -> ScaleResult<Self> {
        match pool.session_support {
            SessionSupport::SingleSession => Ok(LoadSample::SingleSession {
                sessions: pool.sessions,
                capacity: pool.total_capacity,
            }),
            SessionSupport::MultiSession => {
                let members = platform.list_machines(&MachineQuery::default().in_pool(&pool.name))?;
                Ok(LoadSample::MultiSession {
                    total_load: members.iter().map(|m| u64::from(m.load_index)).sum(),
                    machines: u32::try_from(members.len()).unwrap_or(u32::MAX),
                })
            }
        }
    }

    /// Machines that can carry load.
    pub fn capacity(&self) -> u32 {
        match *self {
            LoadSample::SingleSession { capacity, .. } => capacity,
            LoadSample::MultiSession { machines, .. } => machines,
        }
    }

    /// Load as a percentage, or `None` for a pool with no capacity.
    pub fn percent(&self) -> Option<f64> {
        if self.capacity() == 0 {
            return None;
        }
        Some(match *self {
            LoadSample::SingleSession { sessions, capacity } => {
                f64::from(sessions) * 100.0 / f64::from(capacity)
            }
            LoadSample::MultiSession { total_load, machines } => {
                total_load as f64 * 100.0 / (f64::from(MAX_LOAD_INDEX) * f64::from(machines))
            }
        })
    }

    /// Machines to add so that load falls to `high` percent.
    ///
    /// Zero or negative when the pool is already at or below `high`.
    pub fn machines_needed(&self, high: u8) -> i64 {
        let high = f64::from(high);
        let needed = match *self {
            LoadSample::SingleSession { sessions, capacity } => {
                100.0 * f64::from(sessions) / high - f64::from(capacity)
            }
            LoadSample::MultiSession { total_load, machines } => {
                (total_load as f64 * 100.0 / f64::from(MAX_LOAD_INDEX)) / high - f64::from(machines)
            }
        };
        needed.ceil() as i64
    }
}
