use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::LakeResult;
use crate::status::base::{ChunkStatus, Phase, PhaseStatus, StatusDocument, StatusStore};
use crate::types::ChunkId;

/// In-memory status store.
///
/// Every status is lost when the process exits, so a rerun starts from scratch.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatusStore {
    inner: Arc<Mutex<StatusDocument>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything recorded so far.
    pub async fn snapshot(&self) -> StatusDocument {
        self.inner.lock().await.clone()
    }
}

impl StatusStore for MemoryStatusStore {
    async fn get_phase_status(&self, phase: Phase) -> LakeResult<PhaseStatus> {
        let inner = self.inner.lock().await;

        Ok(inner.phase(phase))
    }

    async fn set_phase_status(&self, phase: Phase, status: PhaseStatus) -> LakeResult<()> {
        let mut inner = self.inner.lock().await;
        inner.phases.insert(phase, status);

        Ok(())
    }

    async fn get_chunk_statuses(&self, phase: Phase) -> LakeResult<BTreeMap<ChunkId, ChunkStatus>> {
        let inner = self.inner.lock().await;

        Ok(inner.chunks(phase))
    }

    async fn update_chunk_statuses(
        &self,
        phase: Phase,
        updates: Vec<(ChunkId, ChunkStatus)>,
    ) -> LakeResult<()> {
        let mut inner = self.inner.lock().await;
        inner.apply_chunk_updates(phase, updates);

        Ok(())
    }
}
