//! # dse-eval
//!
//! Turns design points into evaluation results. The [`Evaluator`] copies the
//! kernel sources into a sandbox per job, substitutes `auto{<id>}` markers,
//! and drives the pipeline stages through a [`Scheduler`] and an
//! [`Analyzer`], committing every stage result to the database.

pub mod analyzer;
pub mod cancel;
pub mod evaluator;
pub mod fs;
pub mod scheduler;
pub mod settings;

pub use analyzer::{Analyzer, ReportAnalyzer, StageReportFile};
pub use cancel::CancelToken;
pub use evaluator::Evaluator;
pub use scheduler::{Scheduler, SubprocessScheduler};
pub use settings::EvalSettings;
