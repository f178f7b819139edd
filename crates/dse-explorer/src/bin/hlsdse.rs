//! hlsdse command line.

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use dse_db::ResultDatabase;
use dse_eval::{CancelToken, ReportAnalyzer, SubprocessScheduler};
use dse_explorer::{compile_partitions, prepare_workspace, DseConfig, DseEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RunMode {
    /// Only compile and partition the design space.
    FastCheck,
    /// Explore with the transform and HLS estimation stages.
    FastDse,
    /// Fast exploration, then bitstream generation of the best points.
    AccurateDse,
}

#[derive(Parser, Debug)]
#[command(name = "hlsdse")]
#[command(about = "Automatic design space exploration for HLS kernels")]
struct Cli {
    /// Kernel project directory with auto{} markers
    #[arg(long)]
    src_dir: PathBuf,

    /// DSE working directory
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,

    /// Path to the configuration JSON file
    #[arg(long)]
    config: PathBuf,

    /// Path to the result database (defaults to <work-dir>/result.db)
    #[arg(long)]
    db: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = RunMode::FastDse)]
    mode: RunMode,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let src_dir = cli
        .src_dir
        .canonicalize()
        .with_context(|| format!("Project folder not found: {}", cli.src_dir.display()))?;
    std::fs::create_dir_all(&cli.work_dir)?;
    let work_dir = cli.work_dir.canonicalize()?;
    if src_dir.starts_with(&work_dir) || work_dir.starts_with(&src_dir) {
        bail!("Project and workspace directories cannot contain each other");
    }
    let config_path = cli
        .config
        .canonicalize()
        .with_context(|| format!("Config file not found: {}", cli.config.display()))?;
    let db_path = match &cli.db {
        Some(path) => std::path::absolute(path)?,
        None => work_dir.join("result.db"),
    };

    let config = DseConfig::load(&config_path)?;
    config.validate()?;
    if cli.mode == RunMode::AccurateDse {
        config.validate_accurate()?;
    }

    let parts = compile_partitions(&config)?;
    if cli.mode == RunMode::FastCheck {
        warn!("Check mode: only the design space syntax and types were checked");
        info!(parts = parts.len(), "Finished checking the design space");
        return Ok(());
    }

    prepare_workspace(&work_dir, &[config_path.as_path(), db_path.as_path()])?;
    info!("Workspace initialized");

    info!(path = %db_path.display(), "Initializing the database");
    let db = Arc::new(ResultDatabase::open(
        config.project.name.clone(),
        &db_path,
        config.project.output_num,
    )?);

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, stopping running jobs");
            trigger.cancel();
        }
    });

    let scheduler = SubprocessScheduler::new(config.evaluate.worker_per_part);
    let mode_name = cli
        .mode
        .to_possible_value()
        .map(|value| value.get_name().to_string())
        .unwrap_or_default();
    let engine = DseEngine::new(
        config,
        src_dir,
        &work_dir,
        db,
        Arc::new(scheduler),
        Arc::new(ReportAnalyzer::new()),
        cancel.clone(),
    )?;
    engine.reporter().log_config(&mode_name);

    info!("Start the exploration");
    let points = engine.run_fast(parts).await?;

    if cli.mode == RunMode::AccurateDse {
        if cancel.is_cancelled() {
            warn!("Interrupted, skipping the bitstream phase");
        } else {
            info!(candidates = points.len(), "Start the bitstream phase");
            engine.run_accurate(points).await?;
        }
    }

    info!("Finish the exploration");
    Ok(())
}
