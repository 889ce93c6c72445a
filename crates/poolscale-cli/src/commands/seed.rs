use std::path::Path;

use anyhow::Context;
use poolscale_platform::PlatformFixture;

use crate::profile::Profile;

pub fn seed(profile: &Profile, file: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read fixture {}", file.display()))?;
    seed_str(profile, &content).with_context(|| format!("failed to seed from {}", file.display()))?;
    println!(
        "✓ Seeded {} from {}",
        profile.platform.data_file.display(),
        file.display()
    );
    Ok(())
}

pub fn seed_str(profile: &Profile, content: &str) -> anyhow::Result<()> {
    let fixture: PlatformFixture = toml::from_str(content)?;
    profile.open_platform()?.seed(&fixture)?;
    Ok(())
}
