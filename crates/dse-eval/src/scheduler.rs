//! Bounded execution of stage commands as OS subprocesses.

use crate::cancel::CancelToken;
use crate::fs::{copy_dir, move_matching, remove_tree};
use dse_types::{DseError, DseResult, Job, RetCode};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Runs one command per job and reports how each run ended.
pub trait Scheduler: Send + Sync {
    /// Runs `command` in a private copy of every job sandbox. Files matching
    /// `keep` are moved back into the sandbox afterwards. The returned list
    /// follows the order of `jobs`.
    ///
    /// `timeout` bounds each process on its own, counted from that process's
    /// launch. It is not a wall-clock budget for the whole batch: a job that
    /// waits for a free slot does not use up its time while queued. `None`
    /// means no limit.
    fn run(
        &self,
        jobs: &[Job],
        keep: &[String],
        command: &str,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> DseResult<Vec<(String, RetCode)>>;
}

/// Subprocess scheduler with a sliding window of at most `max_workers`
/// processes. Each process runs `sh -c` in its own process group so a
/// timeout kills everything the shell spawned.
#[derive(Debug, Clone)]
pub struct SubprocessScheduler {
    max_workers: usize,
    poll_interval: Duration,
}

struct Running {
    index: usize,
    child: Child,
    work: PathBuf,
    /// Launch time of this process; the stage timeout is measured from here.
    started: Instant,
}

impl SubprocessScheduler {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn launch(&self, index: usize, job: &Job, command: &str) -> std::io::Result<Running> {
        let work = work_path(job.path());
        copy_dir(job.path(), &work)?;
        let spawned = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&work)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn();
        match spawned {
            Ok(child) => Ok(Running {
                index,
                child,
                work,
                started: Instant::now(),
            }),
            Err(e) => {
                remove_tree(&work);
                Err(e)
            }
        }
    }
}

impl Default for SubprocessScheduler {
    fn default() -> Self {
        Self::new(8)
    }
}

impl Scheduler for SubprocessScheduler {
    fn run(
        &self,
        jobs: &[Job],
        keep: &[String],
        command: &str,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> DseResult<Vec<(String, RetCode)>> {
        debug!(
            jobs = jobs.len(),
            workers = self.max_workers,
            timeout_secs = timeout.map(|t| t.as_secs()),
            "Scheduling jobs"
        );

        let mut codes: Vec<Option<RetCode>> = vec![None; jobs.len()];
        let mut queue = jobs.iter().enumerate();
        let mut running: Vec<Running> = Vec::new();

        loop {
            if cancel.is_cancelled() {
                warn!(in_flight = running.len(), "Interrupted, stopping running processes");
                for mut proc in running.drain(..) {
                    kill_group(&mut proc.child);
                    finish(&jobs[proc.index], &proc.work, keep);
                }
                return Err(DseError::Interrupted);
            }

            while running.len() < self.max_workers {
                let Some((index, job)) = queue.next() else {
                    break;
                };
                match self.launch(index, job, command) {
                    Ok(proc) => running.push(proc),
                    Err(e) => {
                        warn!(job = %job.key, error = %e, "Failed to launch job");
                        codes[index] = Some(RetCode::Unavailable);
                    }
                }
            }

            if running.is_empty() {
                break;
            }

            let mut i = 0;
            while i < running.len() {
                let proc = &mut running[i];
                let code = match proc.child.try_wait() {
                    Ok(Some(status)) => exit_code(status),
                    Ok(None) if timeout.is_some_and(|t| proc.started.elapsed() >= t) => {
                        debug!(job = %jobs[proc.index].key, "Job timed out");
                        kill_group(&mut proc.child);
                        RetCode::Timeout
                    }
                    Ok(None) => {
                        i += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!(job = %jobs[proc.index].key, error = %e, "Failed to poll job");
                        kill_group(&mut proc.child);
                        RetCode::Exited(-1)
                    }
                };
                let proc = running.swap_remove(i);
                finish(&jobs[proc.index], &proc.work, keep);
                codes[proc.index] = Some(code);
            }

            if !running.is_empty() {
                std::thread::sleep(self.poll_interval);
            }
        }

        let passed = codes.iter().filter(|c| matches!(c, Some(RetCode::Pass))).count();
        info!(jobs = jobs.len(), passed, "Finished scheduling");

        Ok(jobs
            .iter()
            .zip(codes)
            .map(|(job, code)| (job.key.clone(), code.unwrap_or(RetCode::Unavailable)))
            .collect())
    }
}

/// Private working copy of a sandbox: `<sandbox>_work`.
pub fn work_path(sandbox: &Path) -> PathBuf {
    let mut path = sandbox.as_os_str().to_owned();
    path.push("_work");
    PathBuf::from(path)
}

fn exit_code(status: ExitStatus) -> RetCode {
    if status.success() {
        return RetCode::Pass;
    }
    // Killed by a signal: report it negated.
    let code = status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1);
    RetCode::Exited(code)
}

fn kill_group(child: &mut Child) {
    match i32::try_from(child.id()) {
        // SAFETY: killpg only sends a signal; the group id is the child's pid
        // because it was spawned with process_group(0).
        Ok(pgid) => unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        },
        Err(_) => {
            let _ = child.kill();
        }
    }
    let _ = child.wait();
}

fn finish(job: &Job, work: &Path, keep: &[String]) {
    let moved = move_matching(work, job.path(), keep);
    debug!(job = %job.key, kept = moved.len(), "Salvaged job files");
    remove_tree(work);
}
