//! Knobs for the simulated platform: fake user load, hurry VM tasks along.

use anyhow::Context;
use poolscale_platform::{LocalPlatform, MAX_LOAD_INDEX, MachineQuery, Platform};
use tracing::info;

use crate::profile::Profile;

pub fn sessions(
    profile: &Profile,
    pool: &str,
    machine: &str,
    count: u32,
    load: Option<u32>,
) -> anyhow::Result<()> {
    let platform = profile.open_platform()?;
    set_sessions(&platform, pool, machine, count, load)?;
    println!("✓ {machine}: {count} sessions");
    Ok(())
}

fn set_sessions(
    platform: &LocalPlatform,
    pool: &str,
    machine: &str,
    count: u32,
    load: Option<u32>,
) -> anyhow::Result<()> {
    if let Some(load) = load {
        anyhow::ensure!(
            load <= MAX_LOAD_INDEX,
            "load index {load} exceeds {MAX_LOAD_INDEX}"
        );
    }
    let current = platform
        .list_machines(&MachineQuery::default().in_pool(pool))?
        .into_iter()
        .find(|m| m.name.eq_ignore_ascii_case(machine))
        .with_context(|| format!("machine {machine} is not a member of pool {pool}"))?;

    let load_index = load.unwrap_or(current.load_index);
    platform.set_machine_load(&current.name, count, load_index)?;
    info!(machine = %current.name, sessions = count, load_index, "machine load set");
    Ok(())
}

pub fn finish_task(profile: &Profile, task_id: &str) -> anyhow::Result<()> {
    let platform = profile.open_platform()?;
    platform
        .finish_task(task_id)
        .with_context(|| format!("failed to finish task {task_id}"))?;
    println!("✓ Task {task_id} finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use poolscale_platform::*;

    use super::*;

    fn platform() -> LocalPlatform {
        let platform = LocalPlatform::open_in_memory().unwrap();
        let fixture: PlatformFixture =
            toml::from_str(include_str!("../../../../demos/desktops/platform.toml")).unwrap();
        platform.seed(&fixture).unwrap();
        platform
    }

    fn member(platform: &LocalPlatform, name: &str) -> Machine {
        platform
            .list_machines(&MachineQuery::default().host(name))
            .unwrap()
            .remove(0)
    }

    #[test]
    fn sessions_are_set_on_pool_members() {
        let platform = platform();
        set_sessions(&platform, "apps", "rds-01", 14, Some(7200)).unwrap();
        let machine = member(&platform, "RDS-01");
        assert_eq!(machine.session_count, 14);
        assert_eq!(machine.load_index, 7200);

        // Omitting the load keeps the previous index.
        set_sessions(&platform, "apps", "RDS-01", 3, None).unwrap();
        assert_eq!(member(&platform, "RDS-01").load_index, 7200);
    }

    #[test]
    fn outsiders_and_overloads_are_rejected() {
        let platform = platform();
        assert!(set_sessions(&platform, "desktops", "RDS-01", 1, None).is_err());
        assert!(set_sessions(&platform, "apps", "RDS-01", 1, Some(MAX_LOAD_INDEX + 1)).is_err());
    }
}
