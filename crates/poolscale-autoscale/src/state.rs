//! The autoscaler's state enum and its storage form.

use std::fmt;
use std::str::FromStr;

/// Where a pool is in the scaling cycle.
///
/// Stored in the pool's annotation map by its variant name. Parsing is
/// strict: an unknown string is an error, never a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScaleState {
    /// Evaluate load against the watermarks.
    MonitorUsage,
    /// Create identity accounts and start a VM creation task.
    ProvisionMachines,
    /// Poll the VM creation task.
    MonitorProvision,
    /// Register created VMs and add them to the pool.
    AddMachines,
    /// Unassign idle owned machines and start a VM deletion task.
    RemoveMachines,
    /// Poll the VM deletion task, then delete the identity accounts.
    MonitorDeleteMachines,
}

impl ScaleState {
    pub const ALL: [ScaleState; 6] = [
        ScaleState::MonitorUsage,
        ScaleState::ProvisionMachines,
        ScaleState::MonitorProvision,
        ScaleState::AddMachines,
        ScaleState::RemoveMachines,
        ScaleState::MonitorDeleteMachines,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ScaleState::MonitorUsage => "MonitorUsage",
            ScaleState::ProvisionMachines => "ProvisionMachines",
            ScaleState::MonitorProvision => "MonitorProvision",
            ScaleState::AddMachines => "AddMachines",
            ScaleState::RemoveMachines => "RemoveMachines",
            ScaleState::MonitorDeleteMachines => "MonitorDeleteMachines",
        }
    }

    /// Whether a handler running in `self` may move the pool to `next`.
    ///
    /// Staying put is always allowed.
    pub fn can_transition_to(self, next: ScaleState) -> bool {
        use ScaleState::*;
        self == next
            || matches!(
                (self, next),
                (MonitorUsage, ProvisionMachines)
                    | (MonitorUsage, RemoveMachines)
                    | (ProvisionMachines, MonitorProvision)
                    | (ProvisionMachines, MonitorUsage)
                    | (MonitorProvision, AddMachines)
                    | (MonitorProvision, MonitorUsage)
                    | (AddMachines, MonitorUsage)
                    | (RemoveMachines, MonitorDeleteMachines)
                    | (RemoveMachines, MonitorUsage)
                    | (MonitorDeleteMachines, MonitorUsage)
            )
    }
}

impl fmt::Display for ScaleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored state string names no known state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownState(pub String);

impl fmt::Display for UnknownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown state {:?}", self.0)
    }
}

impl std::error::Error for UnknownState {}

impl FromStr for ScaleState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScaleState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_form_round_trips() {
        for state in ScaleState::ALL {
            assert_eq!(state.to_string().parse::<ScaleState>(), Ok(state));
        }
    }

    #[test]
    fn unknown_and_miscased_strings_are_rejected() {
        assert!("Idle".parse::<ScaleState>().is_err());
        assert!("monitorusage".parse::<ScaleState>().is_err());
        assert!("".parse::<ScaleState>().is_err());
    }

    #[test]
    fn transition_table() {
        use ScaleState::*;
        assert!(MonitorUsage.can_transition_to(ProvisionMachines));
        assert!(MonitorUsage.can_transition_to(RemoveMachines));
        assert!(AddMachines.can_transition_to(MonitorUsage));
        assert!(MonitorDeleteMachines.can_transition_to(MonitorUsage));

        assert!(!MonitorUsage.can_transition_to(AddMachines));
        assert!(!ProvisionMachines.can_transition_to(RemoveMachines));
        assert!(!AddMachines.can_transition_to(ProvisionMachines));
        assert!(!MonitorDeleteMachines.can_transition_to(RemoveMachines));
    }

    #[test]
    fn every_state_returns_to_monitor_usage() {
        for state in ScaleState::ALL {
            assert!(state.can_transition_to(ScaleState::MonitorUsage));
        }
    }
}
