//! Partition fan-out, progress polling and output generation.

use crate::config::DseConfig;
use crate::explorer::{explored_key, Explorer, ExplorerSummary};
use crate::reporter::Reporter;
use dse_db::ResultDatabase;
use dse_eval::fs::{copy_dir, remove_tree};
use dse_eval::{Analyzer, CancelToken, Evaluator, Scheduler};
use dse_search::create_algorithm;
use dse_space::{compile_design_space, partition, DesignSpace};
use dse_types::{internal_error, BackupMode, DesignPoint, DseResult, EvalMode, EvalResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Tag of the bitstream-phase explorer.
pub const ACCURATE_TAG: &str = "accurate";

/// Compiles the configured design space and partitions it.
pub fn compile_partitions(config: &DseConfig) -> DseResult<Vec<DesignSpace>> {
    info!("Compiling design space");
    let space = compile_design_space(&config.design_space.definition)?;

    info!(max_parts = config.design_space.max_part_num, "Partitioning the design space");
    let parts = partition(&space, config.design_space.max_part_num)?;
    info!(parts = parts.len(), "Partitions generated");
    Ok(parts)
}

/// Moves whatever a previous run left in `work_dir` into a `bak_<timestamp>`
/// directory. Files listed in `keep` are copied instead of moved. Returns the
/// backup directory when one was needed.
pub fn prepare_workspace(work_dir: &Path, keep: &[&Path]) -> DseResult<Option<PathBuf>> {
    if !work_dir.exists() {
        std::fs::create_dir_all(work_dir)?;
        return Ok(None);
    }

    let old: Vec<PathBuf> = std::fs::read_dir(work_dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            !path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("bak_"))
        })
        .collect();
    if old.is_empty() {
        return Ok(None);
    }

    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S%.3f");
    let backup = work_dir.join(format!("bak_{stamp}"));
    std::fs::create_dir_all(&backup)?;
    for path in old {
        let Some(name) = path.file_name() else {
            continue;
        };
        let target = backup.join(name);
        if keep.iter().any(|k| *k == path.as_path()) {
            std::fs::copy(&path, &target)?;
        } else {
            std::fs::rename(&path, &target)?;
        }
    }
    warn!(backup = %backup.display(), "Workspace is not empty, moved previous files");
    Ok(Some(backup))
}

/// Owns the shared database and evaluator for a DSE run.
pub struct DseEngine {
    config: DseConfig,
    src_dir: PathBuf,
    work_dir: PathBuf,
    db: Arc<ResultDatabase>,
    scheduler: Arc<dyn Scheduler>,
    analyzer: Arc<dyn Analyzer>,
    evaluator: Arc<Evaluator>,
    reporter: Arc<Reporter>,
    cancel: CancelToken,
    poll_interval: Duration,
    started: Instant,
}

impl DseEngine {
    /// Sandboxes live under `<work_dir>/evaluate`.
    pub fn new(
        config: DseConfig,
        src_dir: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        db: Arc<ResultDatabase>,
        scheduler: Arc<dyn Scheduler>,
        analyzer: Arc<dyn Analyzer>,
        cancel: CancelToken,
    ) -> DseResult<Self> {
        let src_dir = src_dir.into();
        let work_dir = work_dir.into();

        info!("Initializing the evaluator");
        let evaluator = Evaluator::new(
            &src_dir,
            work_dir.join("evaluate"),
            db.clone(),
            scheduler.clone(),
            analyzer.clone(),
            config.eval_settings(),
            cancel.clone(),
        )?;
        let reporter = Arc::new(Reporter::new(config.clone(), db.clone()));

        Ok(Self {
            config,
            src_dir,
            work_dir,
            db,
            scheduler,
            analyzer,
            evaluator: Arc::new(evaluator),
            reporter,
            cancel,
            poll_interval: Duration::from_secs(1),
            started: Instant::now(),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn db(&self) -> &Arc<ResultDatabase> {
        &self.db
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn output_dir(&self) -> PathBuf {
        self.work_dir.join("output")
    }

    fn explored_total(&self, tags: &[String]) -> usize {
        tags.iter()
            .filter_map(|tag| self.db.query_meta::<usize>(&explored_key(tag)).ok().flatten())
            .sum()
    }

    /// Waits for every explorer, trimming the best cache and reporting
    /// progress once per poll interval.
    async fn supervise(
        &self,
        handles: Vec<JoinHandle<DseResult<ExplorerSummary>>>,
        tags: Vec<String>,
    ) -> Vec<ExplorerSummary> {
        let mut polls: u64 = 0;
        while handles.iter().any(|handle| !handle.is_finished()) {
            tokio::time::sleep(self.poll_interval).await;
            self.db.trim_best();
            self.reporter.log_best();

            let elapsed = self.started.elapsed().as_secs_f64() / 60.0;
            let line = self.reporter.status_line(elapsed, self.explored_total(&tags));
            polls += 1;
            if polls % 60 == 0 {
                info!("{}", line);
            } else {
                debug!("{}", line);
            }
        }
        self.db.trim_best();
        self.reporter.log_best();

        let mut summaries = Vec::with_capacity(handles.len());
        for (tag, handle) in tags.iter().zip(handles) {
            match handle.await {
                Ok(Ok(summary)) => summaries.push(summary),
                Ok(Err(e)) => error!(tag = %tag, error = %e, "Exploration failed"),
                Err(e) => error!(tag = %tag, error = %e, "Explorer task panicked"),
            }
        }
        summaries
    }

    fn write_summary(&self, name: &str) -> DseResult<()> {
        let summary = self.reporter.report_summary()?;
        for line in summary.lines() {
            info!("{}", line);
        }
        std::fs::write(self.work_dir.join(name), summary + "\n")?;
        Ok(())
    }

    /// Explores every partition concurrently, then saves the database,
    /// writes the summary and the fast outputs. Returns the output points,
    /// best first.
    pub async fn run_fast(&self, parts: Vec<DesignSpace>) -> DseResult<Vec<DesignPoint>> {
        let mode = self.config.evaluate.estimate_mode;
        let mut handles = Vec::with_capacity(parts.len());
        let mut tags = Vec::with_capacity(parts.len());
        for (idx, part) in parts.into_iter().enumerate() {
            let tag = format!("part{idx}");
            let mut algorithm = create_algorithm(&self.config.search.algorithm, part)?;
            let mut explorer = Explorer::new(
                tag.clone(),
                self.db.clone(),
                self.evaluator.clone(),
                mode,
                self.config.exploration_budget(),
                self.cancel.clone(),
            )
            .with_max_duplicate_iters(self.config.search.max_duplicate_iters);
            handles.push(tokio::task::spawn_blocking(move || explorer.run(algorithm.as_mut())));
            tags.push(tag);
        }
        info!(explorers = handles.len(), "Explorers launched");

        let summaries = self.supervise(handles, tags).await;
        let explored: usize = summaries.iter().map(|s| s.explored).sum();
        info!(explored, "Fast exploration finished");

        self.db.commit_best()?;
        self.db.persist()?;
        self.write_summary("summary_fast.rpt")?;

        let points = self.gen_fast_outputs()?;
        info!(outputs = points.len(), "Outputs of fast exploration are generated");
        Ok(points)
    }

    /// Re-creates a sandbox per best result under `output/fast/<idx>`.
    /// Drains the best cache.
    fn gen_fast_outputs(&self) -> DseResult<Vec<DesignPoint>> {
        let out_dir = self.output_dir().join("fast");
        if out_dir.exists() {
            remove_tree(&out_dir);
        }
        std::fs::create_dir_all(&out_dir)?;

        let mut points = Vec::new();
        let mut outputs: Vec<(String, EvalResult)> = Vec::new();
        for (key, mut result) in self.db.take_best() {
            let Some(point) = result.point.clone() else {
                warn!(key = %key, "Best result has no design point");
                continue;
            };
            let job = match self.evaluator.prepare_job(&point) {
                Ok(job) => job,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to create output job");
                    continue;
                }
            };
            let idx = outputs.len().to_string();
            std::fs::rename(job.path(), out_dir.join(&idx))?;
            result.path = Some(PathBuf::from(&idx));
            outputs.push((idx, result));
            points.push(point);
        }

        let report = self.reporter.report_output(&outputs);
        if !report.is_empty() {
            std::fs::write(out_dir.join("output.rpt"), report)?;
        }
        Ok(points)
    }

    /// Runs the bitstream stage on `points` with every sandbox kept, then
    /// saves the database and writes the accurate outputs.
    pub async fn run_accurate(&self, points: Vec<DesignPoint>) -> DseResult<usize> {
        self.config.validate_accurate()?;
        if self.config.project.backup != BackupMode::BackupAll {
            info!("Backup mode is set to BACKUP_ALL to keep all bitstream results");
        }
        let settings = self.config.eval_settings().with_backup(BackupMode::BackupAll);
        let evaluator = Evaluator::new(
            &self.src_dir,
            self.work_dir.join("evaluate").join(ACCURATE_TAG),
            self.db.clone(),
            self.scheduler.clone(),
            self.analyzer.clone(),
            settings,
            self.cancel.clone(),
        )?
        .with_sandbox_prefix("bitgen");

        let mut explorer = Explorer::new(
            ACCURATE_TAG,
            self.db.clone(),
            Arc::new(evaluator),
            EvalMode::Accurate,
            self.config.exploration_budget(),
            self.cancel.clone(),
        );
        let handle = tokio::task::spawn_blocking(move || explorer.run_points(&points));
        let summaries = self.supervise(vec![handle], vec![ACCURATE_TAG.to_string()]).await;
        if summaries.is_empty() {
            return Err(internal_error!("Accurate exploration did not finish"));
        }

        self.db.commit_best()?;
        self.db.persist()?;
        self.write_summary("summary_accurate.rpt")?;
        let outputs = self.gen_accurate_outputs()?;
        info!(outputs, "Outputs of accurate exploration are generated");
        Ok(outputs)
    }

    /// Copies every kept bitstream sandbox in the best cache to
    /// `output/accurate/<idx>` and links `output/best` to the first one.
    fn gen_accurate_outputs(&self) -> DseResult<usize> {
        let out_dir = self.output_dir().join(ACCURATE_TAG);
        if out_dir.exists() {
            remove_tree(&out_dir);
        }
        std::fs::create_dir_all(&out_dir)?;

        let mut outputs: Vec<(String, EvalResult)> = Vec::new();
        for (key, mut result) in self.db.take_best() {
            let Some(sandbox) = result.path.clone() else {
                warn!(key = %key, "Bitstream result has no kept sandbox");
                continue;
            };
            let idx = outputs.len().to_string();
            copy_dir(&sandbox, &out_dir.join(&idx))?;
            result.path = Some(PathBuf::from(&idx));
            outputs.push((idx, result));
        }

        let report = self.reporter.report_output(&outputs);
        if !report.is_empty() {
            std::fs::write(out_dir.join("output.rpt"), report)?;

            let link = self.output_dir().join("best");
            if link.symlink_metadata().is_ok() {
                std::fs::remove_file(&link)?;
            }
            std::os::unix::fs::symlink(out_dir.join("0"), &link)?;
        }
        Ok(outputs.len())
    }
}
