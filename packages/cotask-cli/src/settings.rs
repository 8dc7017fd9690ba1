use anyhow::{Context, Result};
use clap::Args;
use cotask_scheduler::SchedulerConfig;
use cotask_vm::VmConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Contents of the optional JSON config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scheduler: SchedulerConfig,
    pub vm: VmConfig,
}

#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// JSON file with `scheduler` and `vm` sections
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Instructions between cancellation checks in an interrupted script
    #[arg(long)]
    pub hook_interval: Option<u32>,
    /// Memory budget of the script engine, in bytes
    #[arg(long)]
    pub memory_limit: Option<usize>,
    /// Chunk name used in error messages
    #[arg(long)]
    pub chunk_name: Option<String>,
}

impl Settings {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn resolve(overrides: &Overrides) -> Result<Self> {
        let mut settings = match &overrides.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        settings.apply(overrides);
        Ok(settings)
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(interval) = overrides.hook_interval {
            self.scheduler.hook_interval = interval;
        }
        if let Some(limit) = overrides.memory_limit {
            self.vm.memory_limit = limit;
        }
        if let Some(name) = &overrides.chunk_name {
            self.scheduler.chunk_name = name.clone();
        }
    }
}
