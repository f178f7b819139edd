//! Human-readable progress and result tables, driven by database queries.

use crate::config::DseConfig;
use dse_db::ResultDatabase;
use dse_types::{DseResult, EvalMode, EvalResult, RetCode};
use parking_lot::Mutex;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{info, warn};

const SPINNER: [char; 4] = ['-', '\\', '|', '/'];

#[derive(Debug, Default)]
struct ReporterState {
    printed_header: bool,
    best_quality: Option<f64>,
    spinner: usize,
}

pub struct Reporter {
    config: DseConfig,
    db: Arc<ResultDatabase>,
    state: Mutex<ReporterState>,
}

fn rule(widths: &[usize]) -> String {
    let mut line = String::from("+");
    for width in widths {
        line.push_str(&"-".repeat(*width));
        line.push('+');
    }
    line
}

fn row(widths: &[usize], cells: &[&str]) -> String {
    let mut line = String::from("|");
    for (width, cell) in widths.iter().zip(cells) {
        let _ = write!(line, "{cell:<width$}|", width = *width);
    }
    line
}

/// `BRAM:12.0%, DSP:3.5%`
pub fn format_utilization(result: &EvalResult) -> String {
    result
        .resources
        .iter()
        .map(|(res, usage)| format!("{res}:{:.1}%", usage.util * 100.0))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Reporter {
    pub fn new(config: DseConfig, db: Arc<ResultDatabase>) -> Self {
        Self {
            config,
            db,
            state: Mutex::new(ReporterState::default()),
        }
    }

    pub fn config_table(&self, run_mode: &str) -> Vec<String> {
        const WIDTHS: [usize; 2] = [15, 40];
        let cfg = &self.config;
        let rows = [
            ("Project", cfg.project.name.clone()),
            ("Run mode", run_mode.to_string()),
            ("Backup mode", format!("{:?}", cfg.project.backup)),
            ("Expected output", cfg.project.output_num.to_string()),
            ("Evaluate mode", format!("{:?}", cfg.evaluate.estimate_mode)),
            ("Search approach", cfg.search.algorithm.name.clone()),
            ("DSE time", cfg.timeout.exploration.to_string()),
            ("HLS time", cfg.timeout.hls.to_string()),
            ("P&R time", cfg.timeout.bitgen.to_string()),
        ];

        let mut lines = vec![rule(&WIDTHS), row(&WIDTHS, &["Config", "Value"]), rule(&WIDTHS)];
        lines.extend(rows.iter().map(|(name, value)| row(&WIDTHS, &[*name, value.as_str()])));
        lines.push(rule(&WIDTHS));
        lines
    }

    pub fn log_config(&self, run_mode: &str) {
        info!("DSE configuration");
        for line in self.config_table(run_mode) {
            info!("{}", line);
        }
        info!("The elapsed time may exceed the exploration time because running jobs are not abandoned");
    }

    /// Logs the best cached result when it improved since the last call.
    /// Returns whether a line was logged.
    pub fn log_best(&self) -> bool {
        const WIDTHS: [usize; 3] = [9, 9, 43];
        let Some((_, best)) = self.db.best_result() else {
            return false;
        };

        let mut state = self.state.lock();
        if !state.printed_header {
            info!("Best result reporting...");
            info!("{}", rule(&WIDTHS));
            info!("{}", row(&WIDTHS, &["Quality", "Perf.", "Resource"]));
            info!("{}", rule(&WIDTHS));
            state.printed_header = true;
        }
        if state.best_quality.map_or(false, |quality| quality >= best.quality) {
            return false;
        }
        state.best_quality = Some(best.quality);
        let quality = format!("{:.1e}", best.quality);
        let perf = format!("{:.1e}", best.perf);
        let util = format_utilization(&best);
        info!("{}", row(&WIDTHS, &[quality.as_str(), perf.as_str(), util.as_str()]));
        info!("{}", rule(&WIDTHS));
        true
    }

    pub fn status_line(&self, elapsed_minutes: f64, explored: usize) -> String {
        let mut state = self.state.lock();
        let spinner = SPINNER[state.spinner];
        state.spinner = (state.spinner + 1) % SPINNER.len();
        let phase = if elapsed_minutes < self.config.timeout.exploration {
            "still working"
        } else {
            "finishing"
        };
        format!("[{elapsed_minutes:4.0}m] Explored {explored} points, {phase}...{spinner}")
    }

    pub fn report_summary(&self) -> DseResult<String> {
        const WIDTHS: [usize; 2] = [15, 15];
        let mut rows: Vec<(&str, String)> = vec![
            ("Total Explored", self.db.count_by_status(RetCode::Pass)?.to_string()),
            ("Timeout", self.db.count_by_status(RetCode::Timeout)?.to_string()),
            ("Analysis Error", self.db.count_by_status(RetCode::AnalyzeError)?.to_string()),
            ("Early Reject", self.db.count_by_status(RetCode::EarlyReject)?.to_string()),
            ("Output Points", self.db.best_len().to_string()),
        ];
        if let Some((_, best)) = self.db.best_result() {
            let label = match self.config.evaluate.estimate_mode {
                EvalMode::Fast => "Best Cycle",
                EvalMode::Accurate => "Best Perf.",
            };
            rows.push((label, best.perf.to_string()));
        }

        let mut lines = vec![rule(&WIDTHS)];
        lines.extend(rows.iter().map(|(name, value)| row(&WIDTHS, &[*name, value.as_str()])));
        lines.push(rule(&WIDTHS));
        Ok(lines.join("\n"))
    }

    /// Table of output directories and their results. Empty when there is
    /// nothing to report.
    pub fn report_output(&self, outputs: &[(String, EvalResult)]) -> String {
        const WIDTHS: [usize; 4] = [14, 9, 9, 43];
        if outputs.is_empty() {
            warn!("No design point is output");
            return String::new();
        }

        let mut lines = vec![
            rule(&WIDTHS),
            row(&WIDTHS, &["Directory", "Quality", "Perf.", "Resource"]),
            rule(&WIDTHS),
        ];
        for (dir, result) in outputs {
            let quality = format!("{:.1e}", result.quality);
            let perf = format!("{:.1e}", result.perf);
            let util = format_utilization(result);
            lines.push(row(&WIDTHS, &[dir.as_str(), quality.as_str(), perf.as_str(), util.as_str()]));
        }
        lines.push(rule(&WIDTHS));
        lines.join("\n") + "\n"
    }
}
