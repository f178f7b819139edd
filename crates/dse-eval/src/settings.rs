use dse_types::{BackupMode, Stage};
use std::collections::BTreeMap;
use std::time::Duration;

/// Everything an evaluator needs to know about the external toolchain.
#[derive(Debug, Clone, Default)]
pub struct EvalSettings {
    /// Shell command per stage. A stage without one is unavailable.
    pub commands: BTreeMap<Stage, String>,
    /// Per-stage timeout in minutes; 0 or absent means none.
    pub timeouts: BTreeMap<Stage, u64>,
    /// Upper bound of the utilization fraction per resource type.
    pub max_util: BTreeMap<String, f64>,
    pub backup: BackupMode,
}

impl EvalSettings {
    pub fn command(&self, stage: Stage) -> Option<&str> {
        self.commands
            .get(&stage)
            .map(String::as_str)
            .filter(|command| !command.trim().is_empty())
    }

    pub fn timeout(&self, stage: Stage) -> Option<Duration> {
        match self.timeouts.get(&stage).copied().unwrap_or(0) {
            0 => None,
            minutes => Some(Duration::from_secs(minutes * 60)),
        }
    }

    pub fn with_backup(mut self, backup: BackupMode) -> Self {
        self.backup = backup;
        self
    }
}
