//! Per-partition exploration loop.

use dse_db::ResultDatabase;
use dse_eval::{CancelToken, Evaluator};
use dse_search::SearchAlgorithm;
use dse_types::{point_key, DesignPoint, DseError, DseResult, EvalMode, EvalResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Database key of the explored-point counter of an explorer.
pub fn explored_key(tag: &str) -> String {
    format!("meta-expr-cnt-{tag}")
}

/// Why an exploration loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Exhausted,
    TimeBudget,
    Stagnated,
    /// A sandbox could not be created or applied.
    JobFailure,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExplorerSummary {
    pub tag: String,
    pub explored: usize,
    pub iterations: usize,
    pub best_quality: Option<f64>,
    pub stop: StopReason,
}

/// Drives one search algorithm against one evaluator.
pub struct Explorer {
    tag: String,
    db: Arc<ResultDatabase>,
    evaluator: Arc<Evaluator>,
    mode: EvalMode,
    budget: Duration,
    max_duplicate_iters: usize,
    cancel: CancelToken,
    explored: usize,
    best_quality: Option<f64>,
}

impl Explorer {
    pub fn new(
        tag: impl Into<String>,
        db: Arc<ResultDatabase>,
        evaluator: Arc<Evaluator>,
        mode: EvalMode,
        budget: Duration,
        cancel: CancelToken,
    ) -> Self {
        Self {
            tag: tag.into(),
            db,
            evaluator,
            mode,
            budget,
            max_duplicate_iters: 0,
            cancel,
            explored: 0,
            best_quality: None,
        }
    }

    pub fn with_max_duplicate_iters(mut self, iters: usize) -> Self {
        self.max_duplicate_iters = iters;
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    fn track_best(&mut self, result: &EvalResult) {
        if !(result.valid && result.is_quality_bearing()) {
            return;
        }
        if self.best_quality.map_or(true, |best| result.quality > best) {
            self.best_quality = Some(result.quality);
            info!(
                tag = %self.tag,
                explored = self.explored,
                quality = result.quality,
                perf = result.perf,
                "Found a better result"
            );
        }
    }

    fn summary(&self, iterations: usize, stop: StopReason) -> ExplorerSummary {
        ExplorerSummary {
            tag: self.tag.clone(),
            explored: self.explored,
            iterations,
            best_quality: self.best_quality,
            stop,
        }
    }

    /// Evaluates the given points and records them as explored.
    fn evaluate(&mut self, points: &[DesignPoint]) -> DseResult<Option<HashMap<String, EvalResult>>> {
        let outcomes = match self.evaluator.evaluate(points, self.mode) {
            Ok(outcomes) => outcomes,
            Err(DseError::Eval(e)) => {
                error!(tag = %self.tag, error = %e, "Failed to prepare jobs");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let mut results = HashMap::with_capacity(outcomes.len());
        for (key, result) in outcomes {
            self.track_best(&result);
            results.insert(key, result);
        }
        self.explored += points.len();
        self.db.commit_meta(&explored_key(&self.tag), &self.explored)?;
        Ok(Some(results))
    }

    /// Runs the search until it is exhausted, the time budget runs out, it
    /// stagnates on duplicates, or the run is interrupted. The budget is
    /// checked between batches only.
    pub fn run(&mut self, algorithm: &mut dyn SearchAlgorithm) -> DseResult<ExplorerSummary> {
        info!(tag = %self.tag, algorithm = algorithm.name(), "Explorer started");
        let timer = Instant::now();
        let mut previous: Option<HashMap<String, EvalResult>> = None;
        let mut iterations = 0;
        let mut duplicated_iters = 0;

        let stop = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Interrupted;
            }
            if timer.elapsed() >= self.budget {
                break StopReason::TimeBudget;
            }
            let Some(points) = algorithm.next_batch(previous.as_ref())? else {
                break StopReason::Exhausted;
            };
            iterations += 1;
            debug!(tag = %self.tag, points = points.len(), "Algorithm generated points");

            let keys: Vec<String> = points.iter().map(point_key).collect();
            let mut results: HashMap<String, EvalResult> = HashMap::new();
            let mut seen: HashSet<&str> = HashSet::new();
            let mut fresh: Vec<DesignPoint> = Vec::new();
            for ((point, key), outcome) in points
                .iter()
                .zip(&keys)
                .zip(self.db.batch_query_outcome(&keys, self.mode)?)
            {
                match outcome {
                    Some(result) => {
                        self.track_best(&result);
                        results.insert(key.clone(), result);
                    }
                    None if seen.insert(key.as_str()) => fresh.push(point.clone()),
                    None => {}
                }
            }

            if fresh.is_empty() {
                duplicated_iters += 1;
                debug!(tag = %self.tag, duplicated_iters, "All points of the batch were evaluated before");
                if self.max_duplicate_iters > 0 && duplicated_iters >= self.max_duplicate_iters {
                    warn!(tag = %self.tag, duplicated_iters, "Search stagnated on duplicates");
                    break StopReason::Stagnated;
                }
                previous = Some(results);
                continue;
            }
            duplicated_iters = 0;

            match self.evaluate(&fresh) {
                Ok(Some(evaluated)) => results.extend(evaluated),
                Ok(None) => break StopReason::JobFailure,
                Err(DseError::Interrupted) => break StopReason::Interrupted,
                Err(e) => return Err(e),
            }
            previous = Some(results);
        };

        info!(tag = %self.tag, explored = self.explored, iterations, stop = ?stop, "Explorer finished");
        Ok(self.summary(iterations, stop))
    }

    /// Evaluates a fixed list of points once.
    pub fn run_points(&mut self, points: &[DesignPoint]) -> DseResult<ExplorerSummary> {
        info!(tag = %self.tag, points = points.len(), "Evaluating candidate points");
        let stop = if points.is_empty() {
            StopReason::Exhausted
        } else {
            match self.evaluate(points) {
                Ok(Some(_)) => StopReason::Exhausted,
                Ok(None) => StopReason::JobFailure,
                Err(DseError::Interrupted) => StopReason::Interrupted,
                Err(e) => return Err(e),
            }
        };
        info!(tag = %self.tag, explored = self.explored, stop = ?stop, "Explorer finished");
        Ok(self.summary(1, stop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{kernel_dir, two_param_space, PointAnalyzer};
    use dse_eval::{EvalSettings, SubprocessScheduler};
    use dse_search::ExhaustiveSearch;
    use dse_types::{BackupMode, RetCode, Stage};

    struct Fixture {
        _dir: tempfile::TempDir,
        db: Arc<ResultDatabase>,
        evaluator: Arc<Evaluator>,
        cancel: CancelToken,
    }

    fn fixture(kernel: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let src = kernel_dir(dir.path(), kernel);
        let mut settings = EvalSettings::default().with_backup(BackupMode::NoBackup);
        settings.commands.insert(Stage::Transform, "true".to_string());
        settings.commands.insert(Stage::Synthesis, "true".to_string());

        let db = Arc::new(ResultDatabase::in_memory("test", 4));
        let cancel = CancelToken::new();
        let scheduler = SubprocessScheduler::new(4).with_poll_interval(Duration::from_millis(10));
        let evaluator = Evaluator::new(
            src,
            dir.path().join("work"),
            db.clone(),
            Arc::new(scheduler),
            Arc::new(PointAnalyzer),
            settings,
            cancel.clone(),
        )
        .unwrap();
        Fixture {
            _dir: dir,
            db,
            evaluator: Arc::new(evaluator),
            cancel,
        }
    }

    fn explorer(fx: &Fixture, budget: Duration) -> Explorer {
        Explorer::new(
            "part0",
            fx.db.clone(),
            fx.evaluator.clone(),
            EvalMode::Fast,
            budget,
            fx.cancel.clone(),
        )
    }

    fn search(batch_size: usize) -> ExhaustiveSearch {
        ExhaustiveSearch::new(two_param_space(), batch_size).unwrap()
    }

    #[test]
    fn test_explores_whole_space() {
        let fx = fixture("A=auto{A}\nB=auto{B}\n");
        let summary = explorer(&fx, Duration::from_secs(60))
            .run(&mut search(3))
            .unwrap();

        assert_eq!(summary.stop, StopReason::Exhausted);
        assert_eq!(summary.explored, 8);
        assert_eq!(summary.best_quality, Some(1.0));
        assert_eq!(fx.db.query_meta::<usize>(&explored_key("part0")).unwrap(), Some(8));
        assert_eq!(fx.db.count_by_status(RetCode::Pass).unwrap(), 16);
        assert_eq!(fx.db.best_len(), 8);
    }

    #[test]
    fn test_duplicates_are_not_reevaluated() {
        let fx = fixture("A=auto{A}\nB=auto{B}\n");
        explorer(&fx, Duration::from_secs(60)).run(&mut search(4)).unwrap();

        let summary = explorer(&fx, Duration::from_secs(60))
            .run(&mut search(4))
            .unwrap();
        assert_eq!(summary.explored, 0);
        assert_eq!(summary.stop, StopReason::Exhausted);
        assert_eq!(summary.best_quality, Some(1.0));

        let summary = explorer(&fx, Duration::from_secs(60))
            .with_max_duplicate_iters(1)
            .run(&mut search(4))
            .unwrap();
        assert_eq!(summary.stop, StopReason::Stagnated);
        assert_eq!(summary.iterations, 1);
    }

    #[test]
    fn test_budget_and_cancel_stop_before_batches() {
        let fx = fixture("A=auto{A}\nB=auto{B}\n");
        let summary = explorer(&fx, Duration::ZERO).run(&mut search(4)).unwrap();
        assert_eq!(summary.stop, StopReason::TimeBudget);
        assert_eq!(summary.iterations, 0);

        fx.cancel.cancel();
        let summary = explorer(&fx, Duration::from_secs(60))
            .run(&mut search(4))
            .unwrap();
        assert_eq!(summary.stop, StopReason::Interrupted);
        assert_eq!(fx.db.count(), 0);
    }

    #[test]
    fn test_unmatched_parameter_aborts_partition() {
        let fx = fixture("A=auto{A}\n");
        let summary = explorer(&fx, Duration::from_secs(60))
            .run(&mut search(4))
            .unwrap();
        assert_eq!(summary.stop, StopReason::JobFailure);
        assert_eq!(summary.explored, 0);
    }

    #[test]
    fn test_run_points() {
        let fx = fixture("A=auto{A}\nB=auto{B}\n");
        let mut point = DesignPoint::new();
        point.insert("A".to_string(), 2.into());
        point.insert("B".to_string(), "on".into());

        let summary = explorer(&fx, Duration::from_secs(60))
            .run_points(&[point])
            .unwrap();
        assert_eq!(summary.explored, 1);
        assert!(fx.db.query("hls:A-2.B-on").unwrap().is_some());
    }
}
