//! Job lifecycle: sandbox creation, point application and staged submission.

use crate::analyzer::Analyzer;
use crate::cancel::CancelToken;
use crate::fs::{copy_dir, rel_string, remove_tree};
use crate::scheduler::Scheduler;
use crate::settings::EvalSettings;
use dse_db::ResultDatabase;
use dse_types::{
    BackupMode, DesignPoint, DseResult, EvalError, EvalMode, EvalResult, Job, JobStatus, RetCode,
    Stage,
};
use rayon::prelude::*;
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

const MARKER_PATTERN: &str = r"(?i)auto\{(.*?)\}";

pub struct Evaluator {
    src_path: PathBuf,
    work_path: PathBuf,
    sandbox_prefix: String,
    src_files: Vec<PathBuf>,
    marker: Regex,
    db: Arc<ResultDatabase>,
    scheduler: Arc<dyn Scheduler>,
    analyzer: Arc<dyn Analyzer>,
    settings: EvalSettings,
    cancel: CancelToken,
}

impl Evaluator {
    /// Resets `work_path` and scans `src_path` for files carrying `auto{...}`
    /// markers. Fails when no such file exists.
    pub fn new(
        src_path: impl Into<PathBuf>,
        work_path: impl Into<PathBuf>,
        db: Arc<ResultDatabase>,
        scheduler: Arc<dyn Scheduler>,
        analyzer: Arc<dyn Analyzer>,
        settings: EvalSettings,
        cancel: CancelToken,
    ) -> DseResult<Self> {
        let src_path = src_path.into();
        let work_path = work_path.into();
        let marker = Regex::new(MARKER_PATTERN)
            .map_err(|e| dse_types::internal_error!("Invalid marker pattern: {}", e))?;

        if work_path.exists() {
            remove_tree(&work_path);
        }
        std::fs::create_dir_all(&work_path)?;

        let src_files = scan_marked_files(&src_path, &marker);
        if src_files.is_empty() {
            error!(path = %src_path.display(), "No kernel file carries an auto marker");
            return Err(EvalError::NoMarkedSources {
                path: src_path.display().to_string(),
            }
            .into());
        }
        info!(files = src_files.len(), path = %src_path.display(), "Scanned kernel sources");

        Ok(Self {
            src_path,
            work_path,
            sandbox_prefix: "eval".to_string(),
            src_files,
            marker,
            db,
            scheduler,
            analyzer,
            settings,
            cancel,
        })
    }

    pub fn with_sandbox_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sandbox_prefix = prefix.into();
        self
    }

    pub fn src_files(&self) -> &[PathBuf] {
        &self.src_files
    }

    pub fn work_path(&self) -> &Path {
        &self.work_path
    }

    pub fn settings(&self) -> &EvalSettings {
        &self.settings
    }

    pub fn db(&self) -> &Arc<ResultDatabase> {
        &self.db
    }

    /// Copies the kernel sources into a fresh sandbox.
    pub fn create_job(&self) -> DseResult<Job> {
        let name = format!("{}_{}", self.sandbox_prefix, uuid::Uuid::new_v4().simple());
        let path = self.work_path.join(name);
        if let Err(e) = copy_dir(&self.src_path, &path) {
            remove_tree(&path);
            error!(path = %path.display(), error = %e, "Failed to create job sandbox");
            return Err(EvalError::SandboxCreation {
                path: path.display().to_string(),
                message: e.to_string(),
            }
            .into());
        }
        Ok(Job::new(path))
    }

    /// Substitutes every marker whose id is in `point` with its value. Every
    /// id of the point must be substituted somewhere.
    pub fn apply(&self, job: &mut Job, point: &DesignPoint) -> DseResult<()> {
        if job.status != JobStatus::Init {
            error!(job = %job.key, path = %job.path().display(), "Job cannot be applied again");
            return Err(EvalError::JobState {
                key: job.key.clone(),
                expected: JobStatus::Init,
                found: job.status,
            }
            .into());
        }

        let mut applied: BTreeSet<String> = BTreeSet::new();
        for file in &self.src_files {
            let path = job.path().join(file);
            let text = std::fs::read_to_string(&path).map_err(|e| sandbox_io(&path, e))?;
            let replaced = self.marker.replace_all(&text, |caps: &Captures| {
                let id = &caps[1];
                match point.get(id) {
                    Some(value) => {
                        applied.insert(id.to_string());
                        value.to_string()
                    }
                    None => {
                        debug!(id, "Marker has no value in the design point");
                        caps[0].to_string()
                    }
                }
            });
            std::fs::write(&path, replaced.as_bytes()).map_err(|e| sandbox_io(&path, e))?;
        }

        let unmatched: Vec<String> = point
            .keys()
            .filter(|id| !applied.contains(*id))
            .cloned()
            .collect();
        if !unmatched.is_empty() {
            for id in &unmatched {
                error!(id = %id, "Cannot find the corresponding auto marker in source files");
            }
            return Err(EvalError::UnmatchedParameters { ids: unmatched }.into());
        }

        job.mark_applied(point.clone());
        Ok(())
    }

    /// Creates a sandbox and applies `point` to it.
    pub fn prepare_job(&self, point: &DesignPoint) -> DseResult<Job> {
        let mut job = self.create_job()?;
        if let Err(e) = self.apply(&mut job, point) {
            remove_tree(job.path());
            return Err(e);
        }
        Ok(job)
    }

    /// Runs one pipeline stage on applied jobs and commits every result under
    /// `<stage-prefix>:<job-key>`.
    pub fn submit(&self, mut jobs: Vec<Job>, stage: Stage) -> DseResult<Vec<(String, EvalResult)>> {
        if let Some(job) = jobs.iter().find(|job| job.status != JobStatus::Applied) {
            return Err(EvalError::JobState {
                key: job.key.clone(),
                expected: JobStatus::Applied,
                found: job.status,
            }
            .into());
        }
        info!(jobs = jobs.len(), %stage, "Submitting jobs");

        let mut results: Vec<EvalResult> = match self.settings.command(stage) {
            None => {
                error!(%stage, "Command for the stage is not set up");
                jobs.iter()
                    .map(|_| EvalResult::new(stage, RetCode::Unavailable))
                    .collect()
            }
            Some(command) => {
                let codes = self.scheduler.run(
                    &jobs,
                    &self.analyzer.desired_artifacts(stage),
                    command,
                    self.settings.timeout(stage),
                    &self.cancel,
                )?;
                jobs.par_iter()
                    .zip(codes.into_par_iter())
                    .map(|(job, (_, code))| self.score(job, stage, code))
                    .collect()
            }
        };

        for (job, result) in jobs.iter_mut().zip(results.iter_mut()) {
            result.point = job.point.clone();
            job.mark_evaluated();
            if self.settings.backup.discards(result.ret_code) {
                remove_tree(job.path());
            }
            if job.path().exists() {
                result.path = Some(job.path().to_path_buf());
            }
        }

        let keyed: Vec<(String, EvalResult)> = jobs
            .iter()
            .map(|job| job.key.clone())
            .zip(results)
            .collect();
        let stage_keys: Vec<String> = keyed.iter().map(|(key, _)| stage.result_key(key)).collect();
        self.db.batch_commit(
            stage_keys
                .iter()
                .map(String::as_str)
                .zip(keyed.iter().map(|(_, result)| result)),
        )?;
        debug!(results = keyed.len(), %stage, "Committed stage results");
        Ok(keyed)
    }

    fn score(&self, job: &Job, stage: Stage, code: RetCode) -> EvalResult {
        if !code.is_pass() {
            return EvalResult::new(stage, code);
        }
        match self.analyzer.analyze(job, stage, &self.settings) {
            None => {
                error!(job = %job.key, %stage, "Failed to analyze stage result");
                EvalResult::new(stage, RetCode::AnalyzeError)
            }
            Some(result) if stage == Stage::Transform && !result.valid => {
                debug!(job = %job.key, criticals = result.criticals().len(), "Early rejected");
                result.with_ret_code(RetCode::EarlyReject)
            }
            Some(result) => result,
        }
    }

    /// Runs the stages of `mode` in order. Only points that passed a stage
    /// move on, each in a fresh sandbox. Returns the last result of every
    /// point.
    pub fn evaluate(&self, points: &[DesignPoint], mode: EvalMode) -> DseResult<Vec<(String, EvalResult)>> {
        let stages = mode.stages();
        let mut pending: Vec<DesignPoint> = points.to_vec();
        let mut outcomes = Vec::with_capacity(points.len());

        for (level, stage) in stages.iter().enumerate() {
            if pending.is_empty() {
                break;
            }
            let mut jobs = Vec::with_capacity(pending.len());
            for point in pending.drain(..) {
                match self.prepare_job(&point) {
                    Ok(job) => jobs.push(job),
                    Err(e) => {
                        for job in &jobs {
                            remove_tree(job.path());
                        }
                        return Err(e);
                    }
                }
            }

            let sandboxes: Vec<PathBuf> = jobs.iter().map(|job| job.path().to_path_buf()).collect();
            let submitted = match self.submit(jobs, *stage) {
                Ok(submitted) => submitted,
                Err(e) => {
                    if self.settings.backup == BackupMode::NoBackup {
                        for sandbox in &sandboxes {
                            remove_tree(sandbox);
                        }
                    }
                    return Err(e);
                }
            };

            let last = level + 1 == stages.len();
            for (key, result) in submitted {
                match result.point.clone() {
                    Some(point) if result.ret_code.is_pass() && !last => pending.push(point),
                    _ => outcomes.push((key, result)),
                }
            }
        }
        Ok(outcomes)
    }
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("src_path", &self.src_path)
            .field("work_path", &self.work_path)
            .field("src_files", &self.src_files)
            .finish()
    }
}

fn sandbox_io(path: &Path, error: std::io::Error) -> dse_types::DseError {
    error!(file = %path.display(), error = %error, "Failed to rewrite marked source file");
    EvalError::SandboxIo {
        path: path.display().to_string(),
        message: error.to_string(),
    }
    .into()
}

fn scan_marked_files(src_path: &Path, marker: &Regex) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(src_path).sort_by_file_name().into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(entry.path()) else {
            warn!(file = %entry.path().display(), "Skipping unreadable source file");
            continue;
        };
        if marker.is_match(&text) {
            if let Ok(rel) = entry.path().strip_prefix(src_path) {
                debug!(file = %rel_string(rel), "Found marked source file");
                files.push(rel.to_path_buf());
            }
        }
    }
    files
}
