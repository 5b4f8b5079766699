//! In-memory registry of processing jobs

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::tracker::{JobSnapshot, ProgressTracker, StageSnapshot};
use crate::error::{Error, Result};

/// Stage template for a PDF upload: (name, description, weight)
pub const PDF_STAGES: [(&str, &str, f64); 6] = [
    ("Text Extraction", "Extracting text and layout from the PDF", 25.0),
    ("Section Identification", "Identifying proposal sections", 20.0),
    (
        "Key Information Extraction",
        "Extracting entities, key phrases and technical terms",
        20.0,
    ),
    ("Vector Indexing", "Indexing content for similarity search", 15.0),
    ("Metadata Storage", "Saving proposal metadata", 10.0),
    ("Finalization", "Finishing processing", 10.0),
];

/// Row returned by [`JobRegistry::list`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: Uuid,
    pub file_name: String,
    pub progress: f64,
    pub is_complete: bool,
    pub start_time: DateTime<Utc>,
    /// End time once complete, start time before that
    pub last_update: DateTime<Utc>,
    /// Name of the running stage, empty when none is running
    pub current_step: String,
    pub steps: Vec<StageSnapshot>,
}

impl From<JobSnapshot> for JobSummary {
    fn from(snapshot: JobSnapshot) -> Self {
        let current_step = snapshot
            .current_step_id
            .as_ref()
            .and_then(|id| snapshot.steps.iter().find(|step| &step.id == id))
            .map(|step| step.name.clone())
            .unwrap_or_default();
        Self {
            id: snapshot.id,
            file_name: snapshot.file_name,
            progress: snapshot.overall_progress,
            is_complete: snapshot.is_complete,
            start_time: snapshot.start_time,
            last_update: snapshot.end_time.unwrap_or(snapshot.start_time),
            current_step,
            steps: snapshot.steps,
        }
    }
}

/// Job counts by completion
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobCounts {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
}

/// Job registry. Jobs live in memory only and are lost on restart.
pub struct JobRegistry {
    jobs: DashMap<Uuid, Arc<ProgressTracker>>,
    retention: Duration,
}

impl JobRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: DashMap::new(),
            retention,
        }
    }

    /// Register a new job with no stages
    pub fn create(&self, file_name: &str) -> Arc<ProgressTracker> {
        let tracker = Arc::new(ProgressTracker::new(file_name));
        self.jobs.insert(tracker.id(), tracker.clone());
        tracing::debug!("Registered job {} for '{}'", tracker.id(), file_name);
        tracker
    }

    /// Register a job carrying the standard six PDF stages
    pub fn create_pdf_job(&self, file_name: &str) -> Arc<ProgressTracker> {
        let tracker = self.create(file_name);
        for (name, description, weight) in PDF_STAGES {
            tracker.add_stage(name, description, weight);
        }
        tracker
    }

    pub fn get(&self, id: &Uuid) -> Result<Arc<ProgressTracker>> {
        self.jobs
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::JobNotFound(id.to_string()))
    }

    /// Summaries of every registered job, newest first
    pub fn list(&self) -> Vec<JobSummary> {
        let mut jobs: Vec<JobSummary> = self
            .jobs
            .iter()
            .map(|entry| entry.value().snapshot().into())
            .collect();
        jobs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        jobs
    }

    /// Forget a job. Subscribers of its tracker keep their channel.
    pub fn remove(&self, id: &Uuid) -> Result<Arc<ProgressTracker>> {
        let (_, tracker) = self
            .jobs
            .remove(id)
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;
        tracing::debug!("Removed job {} for '{}'", id, tracker.file_name());
        Ok(tracker)
    }

    pub fn counts(&self) -> JobCounts {
        let total = self.jobs.len();
        let completed = self
            .jobs
            .iter()
            .filter(|entry| entry.value().is_complete())
            .count();
        JobCounts {
            total,
            completed,
            in_progress: total.saturating_sub(completed),
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Remove completed jobs older than the retention window
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    /// Sweep as if the current time were `now`
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
        else {
            return 0;
        };

        let before = self.jobs.len();
        self.jobs.retain(|_, tracker| match tracker.end_time() {
            Some(end_time) if tracker.is_complete() => end_time >= cutoff,
            _ => true,
        });

        let removed = before.saturating_sub(self.jobs.len());
        if removed > 0 {
            tracing::info!("Swept {} completed jobs", removed);
        }
        removed
    }

    /// Run `sweep` on a fixed interval until the registry is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match registry.upgrade() {
                    Some(registry) => {
                        registry.sweep();
                    }
                    None => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::tracker::StageStatus;

    #[test]
    fn test_pdf_template_weights_sum_to_100() {
        let total: f64 = PDF_STAGES.iter().map(|(_, _, weight)| weight).sum();
        assert_eq!(total, 100.0);

        let registry = JobRegistry::new(Duration::from_secs(3600));
        let tracker = registry.create_pdf_job("proposal.pdf");
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.steps.len(), 6);
        assert!(snapshot.steps.iter().all(|s| s.status == StageStatus::Waiting));
        let total: f64 = snapshot.steps.iter().map(|s| s.percentage_of_total).sum();
        assert_eq!(total, 100.0);
    }

    #[test]
    fn test_unknown_job_is_not_found() {
        let registry = JobRegistry::new(Duration::from_secs(3600));
        let result = registry.get(&Uuid::new_v4());
        assert!(matches!(result, Err(Error::JobNotFound(_))));
    }

    #[test]
    fn test_get_returns_shared_tracker() {
        let registry = JobRegistry::new(Duration::from_secs(3600));
        let tracker = registry.create_pdf_job("a.pdf");
        tracker.start_next_stage(None);

        let fetched = registry.get(&tracker.id()).unwrap();
        assert_eq!(fetched.snapshot().current_step_id.as_deref(), Some("step_0"));
    }

    #[test]
    fn test_sweep_removes_only_old_completed_jobs() {
        let registry = JobRegistry::new(Duration::from_secs(3600));
        let done = registry.create_pdf_job("done.pdf");
        let running = registry.create_pdf_job("running.pdf");
        done.complete_job();

        assert_eq!(registry.sweep(), 0);
        assert_eq!(registry.len(), 2);

        let later = Utc::now() + chrono::Duration::hours(2);
        assert_eq!(registry.sweep_at(later), 1);
        assert!(registry.get(&done.id()).is_err());
        assert!(registry.get(&running.id()).is_ok());
    }

    #[test]
    fn test_list_reports_progress() {
        let registry = JobRegistry::new(Duration::from_secs(3600));
        let tracker = registry.create_pdf_job("a.pdf");
        tracker.start_next_stage(None);
        tracker.complete_current_stage(None);

        let jobs = registry.list();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].file_name, "a.pdf");
        assert_eq!(jobs[0].progress, 25.0);
        assert!(!jobs[0].is_complete);
        assert_eq!(jobs[0].steps.len(), 6);
        assert_eq!(jobs[0].last_update, jobs[0].start_time);
        assert_eq!(jobs[0].current_step, "Text Extraction");

        tracker.complete_job();
        let job = registry.list().remove(0);
        assert_eq!(Some(job.last_update), tracker.end_time());
    }

    #[test]
    fn test_unstarted_job_has_no_current_step() {
        let registry = JobRegistry::new(Duration::from_secs(3600));
        registry.create_pdf_job("queued.pdf");
        assert_eq!(registry.list()[0].current_step, "");
    }

    #[test]
    fn test_list_is_newest_first() {
        let registry = JobRegistry::new(Duration::from_secs(3600));
        let older = registry.create_pdf_job("older.pdf");
        std::thread::sleep(Duration::from_millis(5));
        let newer = registry.create_pdf_job("newer.pdf");

        let ids: Vec<Uuid> = registry.list().iter().map(|job| job.id).collect();
        assert_eq!(ids, vec![newer.id(), older.id()]);
    }

    #[test]
    fn test_remove_and_counts() {
        let registry = JobRegistry::new(Duration::from_secs(3600));
        let done = registry.create_pdf_job("done.pdf");
        let running = registry.create_pdf_job("running.pdf");
        done.complete_job();

        assert_eq!(
            registry.counts(),
            JobCounts {
                total: 2,
                completed: 1,
                in_progress: 1,
            }
        );

        assert_eq!(registry.remove(&running.id()).unwrap().id(), running.id());
        assert!(matches!(registry.remove(&running.id()), Err(Error::JobNotFound(_))));
        assert_eq!(registry.counts().in_progress, 0);
        assert_eq!(registry.len(), 1);
    }
}
