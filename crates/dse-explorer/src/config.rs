//! The DSE configuration file.

use dse_eval::EvalSettings;
use dse_search::AlgorithmConfig;
use dse_space::ParameterConfig;
use dse_types::{config_error, BackupMode, DseResult, EvalMode, Stage};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info};

/// Complete configuration, deserialized from JSON with kebab-case keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DseConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    pub design_space: DesignSpaceConfig,
    #[serde(default)]
    pub evaluate: EvaluateConfig,
    pub timeout: TimeoutConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProjectConfig {
    pub name: String,
    pub backup: BackupMode,
    /// Number of best results kept and written out.
    pub output_num: usize,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "project".to_string(),
            backup: BackupMode::NoBackup,
            output_num: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DesignSpaceConfig {
    /// Parameter definitions in file order.
    pub definition: IndexMap<String, ParameterConfig>,
    #[serde(default = "default_max_part_num")]
    pub max_part_num: usize,
}

fn default_max_part_num() -> usize {
    4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EvaluateConfig {
    pub worker_per_part: usize,
    pub estimate_mode: EvalMode,
    pub command: CommandConfig,
    pub max_util: BTreeMap<String, f64>,
}

impl Default for EvaluateConfig {
    fn default() -> Self {
        Self {
            worker_per_part: 2,
            estimate_mode: EvalMode::Fast,
            command: CommandConfig::default(),
            max_util: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub transform: Option<String>,
    pub hls: Option<String>,
    pub bitgen: Option<String>,
}

impl CommandConfig {
    pub fn get(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Transform => self.transform.as_deref(),
            Stage::Synthesis => self.hls.as_deref(),
            Stage::Bitstream => self.bitgen.as_deref(),
        }
    }
}

/// Timeouts in minutes. Stage timeouts of 0 mean unlimited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TimeoutConfig {
    pub exploration: f64,
    #[serde(default)]
    pub transform: u64,
    #[serde(default)]
    pub hls: u64,
    #[serde(default)]
    pub bitgen: u64,
}

impl TimeoutConfig {
    pub fn get(&self, stage: Stage) -> u64 {
        match stage {
            Stage::Transform => self.transform,
            Stage::Synthesis => self.hls,
            Stage::Bitstream => self.bitgen,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SearchConfig {
    pub algorithm: AlgorithmConfig,
    /// Stop a partition after this many all-duplicate batches; 0 disables.
    pub max_duplicate_iters: usize,
}

impl DseConfig {
    pub fn from_json(text: &str) -> DseResult<Self> {
        serde_json::from_str(text).map_err(|e| config_error!("Failed to parse config: {}", e))
    }

    pub fn load(path: &Path) -> DseResult<Self> {
        if !path.exists() {
            return Err(config_error!("Config file not found: {}", path.display()));
        }
        info!(path = %path.display(), "Loading configurations");
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Checks everything needed before any subprocess is launched. Every
    /// problem is logged; the first one is returned.
    pub fn validate(&self) -> DseResult<()> {
        let mut problems: Vec<String> = Vec::new();

        if self.project.output_num == 0 {
            problems.push("project.output-num must be positive".to_string());
        }
        if self.design_space.definition.is_empty() {
            problems.push("design-space.definition is empty".to_string());
        }
        if self.design_space.max_part_num == 0 {
            problems.push("design-space.max-part-num must be positive".to_string());
        }
        if self.evaluate.worker_per_part == 0 {
            problems.push("evaluate.worker-per-part must be positive".to_string());
        }
        // NaN fails this check too.
        if !(self.timeout.exploration > 0.0) {
            problems.push("timeout.exploration must be a positive number of minutes".to_string());
        }
        for (res, bound) in &self.evaluate.max_util {
            if !(*bound > 0.0 && *bound <= 1.0) {
                problems.push(format!("evaluate.max-util.{res} must be in (0, 1]"));
            }
        }
        for stage in self.evaluate.estimate_mode.stages() {
            if self.evaluate.command.get(*stage).map_or(true, |c| c.trim().is_empty()) {
                problems.push(format!("evaluate.command.{} is required", stage.prefix()));
            }
        }
        if self.search.algorithm.exhaustive.batch_size == 0 {
            problems.push("search.algorithm.exhaustive.batch-size must be positive".to_string());
        }

        for problem in &problems {
            error!("{}", problem);
        }
        match problems.into_iter().next() {
            Some(problem) => Err(config_error!("{}", problem)),
            None => Ok(()),
        }
    }

    /// Additional requirement of the bitstream phase.
    pub fn validate_accurate(&self) -> DseResult<()> {
        match self.evaluate.command.bitgen.as_deref().map(str::trim) {
            Some(command) if !command.is_empty() => Ok(()),
            _ => Err(config_error!("evaluate.command.bitgen is required for accurate exploration")),
        }
    }

    pub fn eval_settings(&self) -> EvalSettings {
        let mut settings = EvalSettings {
            backup: self.project.backup,
            max_util: self.evaluate.max_util.clone(),
            ..EvalSettings::default()
        };
        for stage in Stage::ALL {
            if let Some(command) = self.evaluate.command.get(stage) {
                settings.commands.insert(stage, command.to_string());
            }
            settings.timeouts.insert(stage, self.timeout.get(stage));
        }
        settings
    }

    pub fn exploration_budget(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.timeout.exploration.max(0.0) * 60.0)
    }
}
