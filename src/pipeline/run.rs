//! Run bookkeeping: state machine position, per-stage records and the final summary.
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

/// Identity and time budget of one invocation.
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub deadline: Option<Instant>,
}

impl RunContext {
    #[must_use]
    pub fn new(run_timeout: Option<Duration>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            started_at: Utc::now(),
            // A timeout past the clock's range is no deadline at all.
            deadline: run_timeout.and_then(|timeout| Instant::now().checked_add(timeout)),
        }
    }

    /// Time left before the deadline. `None` means unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    #[must_use]
    pub fn deadline_passed(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// `limit`, shortened to the remaining run budget.
    #[must_use]
    pub fn bounded(&self, limit: Duration) -> Duration {
        self.remaining().map_or(limit, |left| left.min(limit))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunCommand {
    Pipeline,
    Collect,
    Segment,
    Generate,
}

impl RunCommand {
    /// Stages this command executes, in order.
    #[must_use]
    pub fn stages(self) -> &'static [PipelineStage] {
        match self {
            Self::Pipeline => &PipelineStage::ALL,
            Self::Collect => &[PipelineStage::Collect, PipelineStage::Persist],
            Self::Segment => &[
                PipelineStage::NormalizeDedupe,
                PipelineStage::Segment,
                PipelineStage::Rank,
                PipelineStage::Persist,
            ],
            Self::Generate => &[PipelineStage::Generate, PipelineStage::Persist],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Collect,
    NormalizeDedupe,
    Segment,
    Rank,
    Generate,
    Persist,
}

impl PipelineStage {
    pub const ALL: [Self; 6] = [
        Self::Collect,
        Self::NormalizeDedupe,
        Self::Segment,
        Self::Rank,
        Self::Generate,
        Self::Persist,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Collect => "collect",
            Self::NormalizeDedupe => "normalize_dedupe",
            Self::Segment => "segment",
            Self::Rank => "rank",
            Self::Generate => "generate",
            Self::Persist => "persist",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the orchestrator is. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Pending,
    Collect,
    NormalizeDedupe,
    Segment,
    Rank,
    Generate,
    Persist,
    Done,
    Failed,
}

impl From<PipelineStage> for PipelineState {
    fn from(stage: PipelineStage) -> Self {
        match stage {
            PipelineStage::Collect => Self::Collect,
            PipelineStage::NormalizeDedupe => Self::NormalizeDedupe,
            PipelineStage::Segment => Self::Segment,
            PipelineStage::Rank => Self::Rank,
            PipelineStage::Generate => Self::Generate,
            PipelineStage::Persist => Self::Persist,
        }
    }
}

impl PipelineState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Partial,
    Failed,
}

impl RunStatus {
    /// Whether a CLI invocation ending in this status exits successfully.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Succeeded | Self::Partial)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: PipelineStage,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source_id: String,
    pub status: RunStatus,
    pub attempts: usize,
    pub articles: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulletinMode {
    Generated,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentReport {
    pub segment: String,
    pub qualified: usize,
    pub ranked: usize,
    pub bulletin: Option<BulletinMode>,
    pub attempts: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Every source failed.
    Collection,
    /// The input artifacts for a stage-only command are missing or unreadable.
    Input,
    Invariant,
    Persistence,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub collected: usize,
    pub rejected: usize,
    pub normalized: usize,
    pub deduplicated: usize,
    pub duplicates_removed: usize,
    pub unassigned: usize,
    pub gated: usize,
}

/// Audit record for one invocation. Written as the `run_summary` artifact once finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub command: RunCommand,
    pub input_run_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: PipelineState,
    pub status: RunStatus,
    pub stages: Vec<StageRecord>,
    pub sources: Vec<SourceReport>,
    pub segments: Vec<SegmentReport>,
    pub counts: RunCounts,
    pub failure: Option<RunFailure>,
}

impl PipelineRun {
    #[must_use]
    pub fn new(ctx: &RunContext, command: RunCommand, input_run_id: Option<Uuid>) -> Self {
        Self {
            run_id: ctx.run_id,
            command,
            input_run_id,
            started_at: ctx.started_at,
            finished_at: None,
            state: PipelineState::Pending,
            status: RunStatus::Running,
            stages: PipelineStage::ALL
                .iter()
                .map(|stage| StageRecord {
                    stage: *stage,
                    status: RunStatus::Pending,
                    started_at: None,
                    finished_at: None,
                    detail: None,
                })
                .collect(),
            sources: Vec::new(),
            segments: Vec::new(),
            counts: RunCounts::default(),
            failure: None,
        }
    }

    #[must_use]
    pub fn stage(&self, stage: PipelineStage) -> Option<&StageRecord> {
        self.stages.iter().find(|record| record.stage == stage)
    }

    fn stage_mut(&mut self, stage: PipelineStage) -> Option<&mut StageRecord> {
        self.stages.iter_mut().find(|record| record.stage == stage)
    }

    pub fn begin_stage(&mut self, stage: PipelineStage) {
        self.state = stage.into();
        if let Some(record) = self.stage_mut(stage) {
            record.status = RunStatus::Running;
            record.started_at = Some(Utc::now());
        }
    }

    pub fn finish_stage(&mut self, stage: PipelineStage, status: RunStatus, detail: Option<String>) {
        if let Some(record) = self.stage_mut(stage) {
            record.status = status;
            record.finished_at = Some(Utc::now());
            record.detail = detail;
        }
    }

    /// Marks the run failed. The stage that was running, if any, is marked failed too.
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) {
        let message = message.into();
        let running: Vec<PipelineStage> = self
            .stages
            .iter()
            .filter(|record| record.status == RunStatus::Running)
            .map(|record| record.stage)
            .collect();
        for stage in running {
            self.finish_stage(stage, RunStatus::Failed, Some(message.clone()));
        }
        self.state = PipelineState::Failed;
        self.failure = Some(RunFailure { kind, message });
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Settles the overall status. Failed beats partial beats succeeded.
    pub fn finalize(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = Some(finished_at);
        if self.failure.is_some() {
            self.state = PipelineState::Failed;
            self.status = RunStatus::Failed;
            return;
        }

        self.state = PipelineState::Done;
        let any_partial = self
            .stages
            .iter()
            .any(|record| matches!(record.status, RunStatus::Partial | RunStatus::Failed));
        self.status = if any_partial {
            RunStatus::Partial
        } else {
            RunStatus::Succeeded
        };
    }
}
