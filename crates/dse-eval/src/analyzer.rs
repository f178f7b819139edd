//! Turning stage artifacts into results.

use crate::settings::EvalSettings;
use dse_types::{EvalResult, Job, ResourceUsage, Stage, StageReport};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Parses the artifacts a stage command left in a job sandbox.
pub trait Analyzer: Send + Sync {
    /// File wildcards the scheduler must keep for [`analyze`](Self::analyze).
    fn desired_artifacts(&self, stage: Stage) -> Vec<String>;

    /// `None` means the artifacts were missing or unusable.
    fn analyze(&self, job: &Job, stage: Stage, settings: &EvalSettings) -> Option<EvalResult>;
}

/// Contents of `<prefix>_report.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StageReportFile {
    pub success: bool,
    pub eval_time: f64,
    pub perf: f64,
    pub criticals: Vec<String>,
    pub resources: BTreeMap<String, ResourceUsage>,
    pub hotspots: Vec<(String, String)>,
    pub freq: f64,
    pub report: Option<serde_json::Value>,
}

/// Reads the JSON report each stage command writes into its sandbox.
///
/// Quality is `1 / perf` when perf is non-zero. Transform results are valid
/// when there are no critical messages, synthesis results when every
/// configured utilization bound holds.
#[derive(Debug, Clone, Default)]
pub struct ReportAnalyzer;

impl ReportAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn report_name(stage: Stage) -> String {
        format!("{}_report.json", stage.prefix())
    }

    fn read(job: &Job, stage: Stage) -> Option<StageReportFile> {
        let path = job.path().join(Self::report_name(stage));
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                debug!(job = %job.key, path = %path.display(), error = %e, "Missing stage report");
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(file) => Some(file),
            Err(e) => {
                error!(job = %job.key, path = %path.display(), error = %e, "Failed to read stage report");
                None
            }
        }
    }
}

impl Analyzer for ReportAnalyzer {
    fn desired_artifacts(&self, stage: Stage) -> Vec<String> {
        vec![Self::report_name(stage), "*.log".to_string()]
    }

    fn analyze(&self, job: &Job, stage: Stage, settings: &EvalSettings) -> Option<EvalResult> {
        let file = Self::read(job, stage)?;
        if !file.success {
            debug!(job = %job.key, %stage, "Stage report marks the run as failed");
            return None;
        }

        let valid = match stage {
            Stage::Transform => file.criticals.is_empty(),
            Stage::Synthesis => settings.max_util.iter().all(|(res, bound)| {
                file.resources
                    .get(res)
                    .map_or(true, |usage| usage.util < *bound)
            }),
            Stage::Bitstream => true,
        };

        let report = match stage {
            Stage::Transform => StageReport::Transform {
                criticals: file.criticals,
            },
            Stage::Synthesis => StageReport::Synthesis {
                report: file.report,
                hotspots: file.hotspots,
            },
            Stage::Bitstream => StageReport::Bitstream { freq: file.freq },
        };

        let mut result = EvalResult::passed(report);
        result.valid = valid;
        result.eval_time = file.eval_time;
        result.perf = file.perf;
        result.resources = file.resources;
        if file.perf != 0.0 {
            result.quality = 1.0 / file.perf;
        }
        Some(result)
    }
}
