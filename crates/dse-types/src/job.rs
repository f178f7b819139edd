//! A single evaluation attempt bound to a sandbox directory.

use crate::value::{point_key, DesignPoint};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Key carried by a job before a point is applied.
pub const UNAPPLIED_KEY: &str = "NotApplied";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Init,
    Applied,
    Evaluated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub path: PathBuf,
    pub key: String,
    pub status: JobStatus,
    pub point: Option<DesignPoint>,
}

impl Job {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key: UNAPPLIED_KEY.to_string(),
            status: JobStatus::Init,
            point: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Binds the point and derives the job key from it.
    pub fn mark_applied(&mut self, point: DesignPoint) {
        self.key = point_key(&point);
        self.point = Some(point);
        self.status = JobStatus::Applied;
    }

    pub fn mark_evaluated(&mut self) {
        self.status = JobStatus::Evaluated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_lifecycle() {
        let mut job = Job::new("/tmp/eval_1");
        assert_eq!(job.status, JobStatus::Init);
        assert_eq!(job.key, UNAPPLIED_KEY);

        let mut point = DesignPoint::new();
        point.insert("B".to_string(), "off".into());
        point.insert("A".to_string(), 2.into());
        job.mark_applied(point);
        assert_eq!(job.status, JobStatus::Applied);
        assert_eq!(job.key, "A-2.B-off");

        job.mark_evaluated();
        assert_eq!(job.status, JobStatus::Evaluated);
    }
}
