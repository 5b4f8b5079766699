//! Per-job progress state machine with subscriber fan-out
//!
//! A [`ProgressTracker`] owns an ordered list of weighted stages and advances
//! through them monotonically. Every transition recomputes the overall
//! progress and pushes a full [`JobSnapshot`] to each registered
//! [`ProgressSink`]. Sinks are transport-neutral; the HTTP layer adapts them
//! to a WebSocket through [`ChannelSink`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Stage status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Waiting,
    Processing,
    Success,
    Error,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Skipped)
    }

    /// Share of the stage weight credited to overall progress
    fn progress_factor(&self) -> f64 {
        match self {
            Self::Success | Self::Skipped => 1.0,
            // A failed stage keeps the credit it had while running so progress never regresses
            Self::Processing | Self::Error => 0.5,
            Self::Waiting => 0.0,
        }
    }
}

/// One weighted unit of work within a job
#[derive(Debug, Clone)]
struct Stage {
    id: String,
    name: String,
    description: String,
    weight: f64,
    status: StageStatus,
    details: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl Stage {
    fn new(id: String, name: &str, description: &str, weight: f64) -> Self {
        Self {
            id,
            name: name.to_string(),
            description: description.to_string(),
            weight,
            status: StageStatus::Waiting,
            details: None,
            start_time: None,
            end_time: None,
            error: None,
        }
    }

    fn start(&mut self, details: Option<&str>) {
        self.status = StageStatus::Processing;
        self.start_time = Some(Utc::now());
        self.set_details(details);
    }

    fn finish(&mut self, status: StageStatus, details: Option<&str>) {
        self.status = status;
        self.end_time = Some(Utc::now());
        self.set_details(details);
    }

    fn set_details(&mut self, details: Option<&str>) {
        if let Some(details) = details {
            self.details = Some(details.to_string());
        }
    }

    fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            percentage_of_total: self.weight,
            status: self.status,
            details: self.details.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            error: self.error.clone(),
        }
    }
}

/// Externally visible state of one stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StageSnapshot {
    pub id: String,
    pub name: String,
    pub description: String,
    pub percentage_of_total: f64,
    pub status: StageStatus,
    pub details: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Externally visible state of a job, pushed on every transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: Uuid,
    pub file_name: String,
    pub steps: Vec<StageSnapshot>,
    pub current_step_id: Option<String>,
    pub overall_progress: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_complete: bool,
}

/// Receiver of progress snapshots.
///
/// `deliver` is called synchronously while the tracker is locked, so
/// implementations must not block. Returning `false` marks the sink as closed
/// and the tracker drops it.
pub trait ProgressSink: Send + Sync {
    fn deliver(&self, snapshot: &JobSnapshot) -> bool;
}

/// Sink backed by an unbounded tokio channel
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<JobSnapshot>,
}

impl ChannelSink {
    /// Create a sink and the receiver a consumer reads from
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<JobSnapshot>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }
}

impl ProgressSink for ChannelSink {
    fn deliver(&self, snapshot: &JobSnapshot) -> bool {
        self.sender.send(snapshot.clone()).is_ok()
    }
}

/// Handle returned by [`ProgressTracker::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Mutable job record
struct ProcessingJob {
    file_name: String,
    stages: Vec<Stage>,
    /// -1 before the first stage starts
    current_stage_index: i64,
    overall_progress: f64,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    is_complete: bool,
}

impl ProcessingJob {
    fn current_stage_mut(&mut self) -> Option<&mut Stage> {
        usize::try_from(self.current_stage_index)
            .ok()
            .and_then(|i| self.stages.get_mut(i))
    }

    fn current_stage(&self) -> Option<&Stage> {
        usize::try_from(self.current_stage_index)
            .ok()
            .and_then(|i| self.stages.get(i))
    }

    fn update_progress(&mut self) {
        let mut completed = 0.0;
        for (i, stage) in self.stages.iter().enumerate() {
            let i = i as i64;
            if i < self.current_stage_index {
                completed += stage.weight;
            } else if i == self.current_stage_index {
                completed += stage.weight * stage.status.progress_factor();
            }
        }

        let rounded = ((completed * 10.0).round() / 10.0).min(100.0);
        self.overall_progress = self.overall_progress.max(rounded);
    }
}

struct TrackerState {
    job: ProcessingJob,
    subscribers: Vec<(SubscriptionId, Arc<dyn ProgressSink>)>,
}

impl TrackerState {
    fn snapshot(&self, id: Uuid) -> JobSnapshot {
        let job = &self.job;
        JobSnapshot {
            id,
            file_name: job.file_name.clone(),
            steps: job.stages.iter().map(Stage::snapshot).collect(),
            current_step_id: job.current_stage().map(|s| s.id.clone()),
            overall_progress: job.overall_progress,
            start_time: job.start_time,
            end_time: job.end_time,
            is_complete: job.is_complete,
        }
    }

    fn notify(&mut self, id: Uuid) {
        if self.subscribers.is_empty() {
            return;
        }
        let snapshot = self.snapshot(id);
        self.subscribers.retain(|(subscription, sink)| {
            let delivered = sink.deliver(&snapshot);
            if !delivered {
                tracing::debug!("Dropping closed progress subscriber {:?} for job {}", subscription, id);
            }
            delivered
        });
    }
}

/// Progress tracker for one processing job
pub struct ProgressTracker {
    id: Uuid,
    state: Mutex<TrackerState>,
    next_subscription: AtomicU64,
}

impl ProgressTracker {
    /// Create a tracker with no stages
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: Mutex::new(TrackerState {
                job: ProcessingJob {
                    file_name: file_name.into(),
                    stages: Vec::new(),
                    current_stage_index: -1,
                    overall_progress: 0.0,
                    start_time: Utc::now(),
                    end_time: None,
                    is_complete: false,
                },
                subscribers: Vec::new(),
            }),
            next_subscription: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn file_name(&self) -> String {
        self.state.lock().job.file_name.clone()
    }

    /// Append a stage in `waiting`. Weights across a job are expected to sum to 100.
    pub fn add_stage(&self, name: &str, description: &str, weight: f64) -> String {
        let mut state = self.state.lock();
        let id = format!("step_{}", state.job.stages.len());
        state.job.stages.push(Stage::new(id.clone(), name, description, weight));
        id
    }

    /// Advance to the next stage and mark it `processing`.
    ///
    /// Returns `None` without changing anything when no stages remain. A
    /// previous stage still in `processing` is closed as `success` first so
    /// that at most one stage is ever running.
    pub fn start_next_stage(&self, details: Option<&str>) -> Option<StageSnapshot> {
        let mut state = self.state.lock();
        let next = state.job.current_stage_index + 1;
        if next as usize >= state.job.stages.len() {
            return None;
        }

        if let Some(previous) = state.job.current_stage_mut() {
            if previous.status == StageStatus::Processing {
                tracing::debug!("Stage '{}' left running; closing it before advancing", previous.name);
                previous.finish(StageStatus::Success, None);
            }
        }

        state.job.current_stage_index = next;
        let started = {
            let stage = &mut state.job.stages[next as usize];
            stage.start(details);
            stage.snapshot()
        };
        state.job.update_progress();
        state.notify(self.id);

        tracing::info!(
            "[{}] Stage {} started: {}",
            state.job.file_name,
            started.id,
            started.name
        );
        Some(started)
    }

    /// Mark the current stage `success`
    pub fn complete_current_stage(&self, details: Option<&str>) -> bool {
        self.finish_current(StageStatus::Success, details, None)
    }

    /// Mark the current stage `error`. The job itself keeps going until `complete_job`.
    pub fn fail_current_stage(&self, error: &str, details: Option<&str>) -> bool {
        self.finish_current(StageStatus::Error, details, Some(error))
    }

    /// Mark the current stage `skipped`
    pub fn skip_current_stage(&self, reason: Option<&str>) -> bool {
        self.finish_current(StageStatus::Skipped, reason, None)
    }

    fn finish_current(&self, status: StageStatus, details: Option<&str>, error: Option<&str>) -> bool {
        let mut state = self.state.lock();
        let Some(stage) = state.job.current_stage_mut() else {
            return false;
        };
        if stage.status.is_terminal() {
            return false;
        }

        stage.finish(status, details);
        if let Some(error) = error {
            stage.error = Some(error.to_string());
        }
        state.job.update_progress();
        state.notify(self.id);
        true
    }

    /// Mark the job complete, force progress to 100 and push the terminal snapshot
    pub fn complete_job(&self) {
        let mut state = self.state.lock();
        if state.job.is_complete {
            return;
        }
        state.job.is_complete = true;
        state.job.end_time = Some(Utc::now());
        state.job.overall_progress = 100.0;
        state.notify(self.id);

        tracing::info!("[{}] Job {} complete", state.job.file_name, self.id);
    }

    /// Register a sink and deliver the current snapshot to it immediately
    pub fn subscribe(&self, sink: Arc<dyn ProgressSink>) -> SubscriptionId {
        let subscription = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state.lock();
        let snapshot = state.snapshot(self.id);
        if sink.deliver(&snapshot) {
            state.subscribers.push((subscription, sink));
        }
        subscription
    }

    /// Remove a sink. Unknown ids are ignored.
    pub fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        let mut state = self.state.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|(id, _)| *id != subscription);
        state.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.state.lock().snapshot(self.id)
    }

    pub fn current_stage(&self) -> Option<StageSnapshot> {
        self.state.lock().job.current_stage().map(Stage::snapshot)
    }

    pub fn overall_progress(&self) -> f64 {
        self.state.lock().job.overall_progress
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().job.is_complete
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().job.end_time
    }
}
