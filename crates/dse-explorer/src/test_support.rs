//! Fixtures shared by the explorer and engine tests.

use dse_eval::{Analyzer, EvalSettings};
use dse_space::{compile_design_space, DesignSpace, ParameterConfig};
use dse_types::{EvalResult, Job, Stage, StageReport};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Writes `kernel` as `src/kernel.c` under `root`.
pub fn kernel_dir(root: &Path, kernel: &str) -> PathBuf {
    let src = root.join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("kernel.c"), kernel).unwrap();
    src
}

pub fn two_param_definition() -> IndexMap<String, ParameterConfig> {
    let mut definition = IndexMap::new();
    definition.insert("A".to_string(), ParameterConfig::new("[1, 2, 4, 8]", 1));
    definition.insert("B".to_string(), ParameterConfig::new("['off', 'on']", "off"));
    definition
}

/// Two independent parameters, 8 points.
pub fn two_param_space() -> DesignSpace {
    compile_design_space(&two_param_definition()).unwrap()
}

/// Scores every stage from the applied point: perf is the value of `A`.
pub struct PointAnalyzer;

impl Analyzer for PointAnalyzer {
    fn desired_artifacts(&self, _stage: Stage) -> Vec<String> {
        Vec::new()
    }

    fn analyze(&self, job: &Job, stage: Stage, _settings: &EvalSettings) -> Option<EvalResult> {
        let perf = job.point.as_ref()?.get("A")?.as_int()? as f64;
        let mut result = EvalResult::passed(StageReport::empty(stage));
        result.valid = true;
        result.perf = perf;
        result.quality = 1.0 / perf;
        Some(result)
    }
}
