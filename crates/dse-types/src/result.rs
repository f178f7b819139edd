//! Evaluation results and the pipeline vocabulary they are tagged with.

use crate::value::DesignPoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Outcome status of one evaluation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetCode {
    Pass,
    Timeout,
    EarlyReject,
    AnalyzeError,
    Unavailable,
    Duplicated,
    /// The stage command exited with this non-zero status.
    Exited(i32),
}

impl RetCode {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

impl std::fmt::Display for RetCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::EarlyReject => write!(f, "EARLY_REJECT"),
            Self::AnalyzeError => write!(f, "ANALYZE_ERROR"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::Duplicated => write!(f, "DUPLICATED"),
            Self::Exited(code) => write!(f, "EXITED({code})"),
        }
    }
}

/// One phase of the evaluation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Transform,
    Synthesis,
    Bitstream,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Transform, Stage::Synthesis, Stage::Bitstream];

    /// Database key prefix and config key of the stage.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Transform => "transform",
            Self::Synthesis => "hls",
            Self::Bitstream => "bitgen",
        }
    }

    /// Database key of a job's result at this stage.
    pub fn result_key(&self, job_key: &str) -> String {
        format!("{}:{}", self.prefix(), job_key)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Which stages an evaluation runs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvalMode {
    #[default]
    Fast,
    Accurate,
}

impl EvalMode {
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            Self::Fast => &[Stage::Transform, Stage::Synthesis],
            Self::Accurate => &[Stage::Bitstream],
        }
    }

    pub fn final_stage(&self) -> Stage {
        match self {
            Self::Fast => Stage::Synthesis,
            Self::Accurate => Stage::Bitstream,
        }
    }
}

/// Sandbox retention policy after a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupMode {
    #[default]
    NoBackup,
    BackupError,
    BackupAll,
}

impl BackupMode {
    /// Whether a sandbox with this outcome is deleted.
    pub fn discards(&self, ret_code: RetCode) -> bool {
        match self {
            Self::NoBackup => true,
            Self::BackupError => matches!(ret_code, RetCode::Pass | RetCode::EarlyReject),
            Self::BackupAll => false,
        }
    }
}

/// Resource usage of one category, as a fraction and as an absolute amount.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub util: f64,
    pub total: f64,
}

/// Stage-specific result payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StageReport {
    Transform {
        /// Blocking diagnostics reported by the transformation.
        #[serde(default)]
        criticals: Vec<String>,
    },
    Synthesis {
        #[serde(default)]
        report: Option<serde_json::Value>,
        /// Hotspot ids and their bottleneck type, most important first.
        #[serde(default)]
        hotspots: Vec<(String, String)>,
    },
    Bitstream {
        #[serde(default)]
        freq: f64,
    },
}

impl StageReport {
    pub fn empty(stage: Stage) -> Self {
        match stage {
            Stage::Transform => Self::Transform {
                criticals: Vec::new(),
            },
            Stage::Synthesis => Self::Synthesis {
                report: None,
                hotspots: Vec::new(),
            },
            Stage::Bitstream => Self::Bitstream { freq: 0.0 },
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Transform { .. } => Stage::Transform,
            Self::Synthesis { .. } => Stage::Synthesis,
            Self::Bitstream { .. } => Stage::Bitstream,
        }
    }
}

fn worst_quality() -> f64 {
    f64::MIN
}

/// The outcome of evaluating one job at one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub report: StageReport,
    pub ret_code: RetCode,
    #[serde(default)]
    pub valid: bool,
    /// Ranking metric, higher is better.
    #[serde(default = "worst_quality")]
    pub quality: f64,
    #[serde(default)]
    pub perf: f64,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceUsage>,
    /// Elapsed evaluation time in seconds.
    #[serde(default)]
    pub eval_time: f64,
    #[serde(default)]
    pub point: Option<DesignPoint>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl EvalResult {
    pub fn new(stage: Stage, ret_code: RetCode) -> Self {
        Self {
            report: StageReport::empty(stage),
            ret_code,
            valid: false,
            quality: worst_quality(),
            perf: 0.0,
            resources: BTreeMap::new(),
            eval_time: 0.0,
            point: None,
            path: None,
            created_at: Utc::now(),
        }
    }

    pub fn passed(report: StageReport) -> Self {
        let mut result = Self::new(report.stage(), RetCode::Pass);
        result.report = report;
        result
    }

    pub fn with_ret_code(mut self, ret_code: RetCode) -> Self {
        self.ret_code = ret_code;
        self
    }

    pub fn with_point(mut self, point: DesignPoint) -> Self {
        self.point = Some(point);
        self
    }

    pub fn stage(&self) -> Stage {
        self.report.stage()
    }

    /// Only synthesis and bitstream results carry a meaningful quality.
    pub fn is_quality_bearing(&self) -> bool {
        matches!(
            self.report,
            StageReport::Synthesis { .. } | StageReport::Bitstream { .. }
        )
    }

    /// Candidate for the best-result cache.
    pub fn is_rankable(&self) -> bool {
        self.ret_code.is_pass() && self.valid && self.is_quality_bearing()
    }

    /// Number of blocking diagnostics carried by a transform result.
    pub fn criticals(&self) -> &[String] {
        match &self.report {
            StageReport::Transform { criticals } => criticals,
            _ => &[],
        }
    }
}
