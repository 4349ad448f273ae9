use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LakeResult;
use crate::types::ChunkId;

/// A phase of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Reorganize,
    Commit,
    Validate,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Reorganize, Phase::Commit, Phase::Validate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Reorganize => "reorganize",
            Phase::Commit => "commit",
            Phase::Validate => "validate",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    NotStarted,
    Running {
        since: DateTime<Utc>,
    },
    Completed {
        at: DateTime<Utc>,
    },
    Failed {
        at: DateTime<Utc>,
        reason: String,
    },
}

impl PhaseStatus {
    pub fn running() -> Self {
        PhaseStatus::Running { since: Utc::now() }
    }

    pub fn completed() -> Self {
        PhaseStatus::Completed { at: Utc::now() }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        PhaseStatus::Failed {
            at: Utc::now(),
            reason: reason.into(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, PhaseStatus::Completed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Done { rows: u64 },
    Skipped,
    Failed { reason: String },
}

impl ChunkStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, ChunkStatus::Failed { .. })
    }
}

/// Trait for recording the progress of pipeline phases and of the chunks they process.
///
/// Implementations must be safe to share between the tasks of a phase.
pub trait StatusStore {
    /// Returns the status of `phase`, [`PhaseStatus::NotStarted`] when nothing was recorded.
    fn get_phase_status(&self, phase: Phase) -> impl Future<Output = LakeResult<PhaseStatus>> + Send;

    fn set_phase_status(
        &self,
        phase: Phase,
        status: PhaseStatus,
    ) -> impl Future<Output = LakeResult<()>> + Send;

    /// Returns every chunk status recorded for `phase`.
    fn get_chunk_statuses(
        &self,
        phase: Phase,
    ) -> impl Future<Output = LakeResult<BTreeMap<ChunkId, ChunkStatus>>> + Send;

    /// Updates multiple chunk statuses of `phase` in a single write.
    fn update_chunk_statuses(
        &self,
        phase: Phase,
        updates: Vec<(ChunkId, ChunkStatus)>,
    ) -> impl Future<Output = LakeResult<()>> + Send;

    fn update_chunk_status(
        &self,
        phase: Phase,
        chunk: ChunkId,
        status: ChunkStatus,
    ) -> impl Future<Output = LakeResult<()>> + Send {
        self.update_chunk_statuses(phase, vec![(chunk, status)])
    }
}

/// Serializable snapshot of every recorded status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDocument {
    #[serde(default)]
    pub phases: BTreeMap<Phase, PhaseStatus>,
    #[serde(default)]
    pub chunks: BTreeMap<Phase, BTreeMap<ChunkId, ChunkStatus>>,
}

impl StatusDocument {
    pub fn phase(&self, phase: Phase) -> PhaseStatus {
        self.phases.get(&phase).cloned().unwrap_or_default()
    }

    pub fn chunks(&self, phase: Phase) -> BTreeMap<ChunkId, ChunkStatus> {
        self.chunks.get(&phase).cloned().unwrap_or_default()
    }

    pub fn apply_chunk_updates(&mut self, phase: Phase, updates: Vec<(ChunkId, ChunkStatus)>) {
        let chunks = self.chunks.entry(phase).or_default();
        for (chunk, status) in updates {
            chunks.insert(chunk, status);
        }
    }
}
