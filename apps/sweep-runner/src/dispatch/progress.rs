//! Progress tracking for a dispatch batch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::result::DispatchStatus;

/// Progress tracker shared by the workers of one batch.
#[derive(Debug)]
pub struct ProgressTracker {
    total_jobs: u64,
    completed_jobs: AtomicU64,
    failed_jobs: AtomicU64,
    cancelled_jobs: AtomicU64,
    start_time: Instant,
}

impl ProgressTracker {
    /// Create a new progress tracker.
    #[must_use]
    pub fn new(total_jobs: u64) -> Self {
        Self {
            total_jobs,
            completed_jobs: AtomicU64::new(0),
            failed_jobs: AtomicU64::new(0),
            cancelled_jobs: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a finished configuration and return the new snapshot.
    pub fn job_completed(&self, status: DispatchStatus) -> Progress {
        self.completed_jobs.fetch_add(1, Ordering::Relaxed);
        match status {
            DispatchStatus::Success => {}
            DispatchStatus::Failed => {
                self.failed_jobs.fetch_add(1, Ordering::Relaxed);
            }
            DispatchStatus::Cancelled => {
                self.cancelled_jobs.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.progress()
    }

    /// Get current progress.
    #[must_use]
    pub fn progress(&self) -> Progress {
        let completed = self.completed_jobs.load(Ordering::Relaxed);
        let failed = self.failed_jobs.load(Ordering::Relaxed);
        let cancelled = self.cancelled_jobs.load(Ordering::Relaxed);
        let elapsed = self.start_time.elapsed();

        let jobs_per_sec = if elapsed.as_secs_f64() > 0.0 {
            completed as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let remaining = self.total_jobs.saturating_sub(completed);
        let eta_secs = if jobs_per_sec > 0.0 {
            (remaining as f64 / jobs_per_sec) as u64
        } else {
            0
        };

        Progress {
            total: self.total_jobs,
            completed,
            failed,
            cancelled,
            elapsed_secs: elapsed.as_secs(),
            eta_secs,
            jobs_per_sec,
        }
    }
}

/// Progress snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    /// Total number of configurations.
    pub total: u64,
    /// Configurations with a recorded result.
    pub completed: u64,
    /// Of which failed.
    pub failed: u64,
    /// Of which cancelled.
    pub cancelled: u64,
    /// Elapsed time in seconds.
    pub elapsed_secs: u64,
    /// Estimated time remaining in seconds.
    pub eta_secs: u64,
    /// Configurations processed per second.
    pub jobs_per_sec: f64,
}

impl Progress {
    /// Get completion percentage.
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.completed as f64 / self.total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_tracker() {
        let tracker = ProgressTracker::new(10);

        tracker.job_completed(DispatchStatus::Success);
        tracker.job_completed(DispatchStatus::Success);
        tracker.job_completed(DispatchStatus::Failed);
        let progress = tracker.job_completed(DispatchStatus::Cancelled);

        assert_eq!(progress.total, 10);
        assert_eq!(progress.completed, 4);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.cancelled, 1);
        assert!((progress.percentage() - 40.0).abs() < 0.1);
    }

    #[test]
    fn test_empty_batch_is_complete() {
        let progress = ProgressTracker::new(0).progress();
        assert!((progress.percentage() - 100.0).abs() < f64::EPSILON);
        assert_eq!(progress.eta_secs, 0);
    }
}
