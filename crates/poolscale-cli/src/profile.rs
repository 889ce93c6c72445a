//! Operator profile: where the platform lives and the scaling defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use poolscale_autoscale::{Defaults, Watermarks};
use poolscale_platform::LocalPlatform;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Profile {
    pub platform: PlatformSection,
    pub defaults: DefaultsSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformSection {
    /// redb file holding the local platform.
    pub data_file: PathBuf,
    /// Seconds before an issued VM task reports completion.
    pub task_latency_secs: u64,
}

impl Default for PlatformSection {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("poolscale.redb"),
            task_latency_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultsSection {
    pub high_watermark: i64,
    pub low_watermark: i64,
    pub tag_suffix: String,
    pub debug: bool,
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            high_watermark: 80,
            low_watermark: 20,
            tag_suffix: "-autoscale".to_string(),
            debug: false,
        }
    }
}

impl Profile {
    /// Read a profile, or fall back to built-in defaults when none is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read profile {}", path.display()))?;
        let profile: Profile = toml::from_str(&content)
            .with_context(|| format!("invalid profile {}", path.display()))?;
        profile.scale_defaults()?;
        Ok(profile)
    }

    /// Fallbacks for pools initialized without explicit parameters.
    pub fn scale_defaults(&self) -> anyhow::Result<Defaults> {
        let d = &self.defaults;
        let watermarks = Watermarks::new(d.high_watermark, d.low_watermark)
            .context("invalid default watermarks in profile")?;
        Ok(Defaults {
            watermarks,
            tag_suffix: d.tag_suffix.clone(),
        })
    }

    /// Open the local platform named by the profile, creating it if absent.
    pub fn open_platform(&self) -> anyhow::Result<LocalPlatform> {
        let path = &self.platform.data_file;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let platform = LocalPlatform::open(path)
            .with_context(|| format!("failed to open platform {}", path.display()))?
            .with_task_latency(Duration::from_secs(self.platform.task_latency_secs));
        debug!(path = %path.display(), "platform opened");
        Ok(platform)
    }
}
