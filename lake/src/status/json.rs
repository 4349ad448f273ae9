use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::codec;
use crate::error::{ErrorKind, LakeResult};
use crate::lake_error;
use crate::status::base::{ChunkStatus, Phase, PhaseStatus, StatusDocument, StatusStore};
use crate::types::ChunkId;

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    document: StatusDocument,
}

/// Status store persisted as a single JSON document.
///
/// The document is loaded once on open and kept in memory; every update rewrites the whole file
/// through a temporary sibling and a rename, so the file on disk is always a complete document.
#[derive(Debug, Clone)]
pub struct JsonFileStatusStore {
    inner: Arc<Mutex<Inner>>,
}

impl JsonFileStatusStore {
    /// Opens the store at `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> LakeResult<Self> {
        let path = path.into();
        let document = if path.is_file() {
            let content = fs::read(&path)?;
            serde_json::from_slice(&content).map_err(|err| {
                lake_error!(
                    ErrorKind::DeserializationError,
                    "Status file is not a valid status document",
                    path.display(),
                    source: err
                )
            })?
        } else {
            StatusDocument::default()
        };

        debug!(path = %path.display(), phases = document.phases.len(), "opened status store");

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner { path, document })),
        })
    }
}

impl Inner {
    async fn persist(&self) -> LakeResult<()> {
        let path = self.path.clone();
        let content = serde_json::to_vec_pretty(&self.document)?;

        tokio::task::spawn_blocking(move || write_atomic(&path, &content)).await?
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> LakeResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let temp_path = codec::temp_sibling(path)?;
    let result = (|| -> LakeResult<()> {
        let mut file = File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        codec::remove_quietly(&temp_path);
    }

    result
}

impl StatusStore for JsonFileStatusStore {
    async fn get_phase_status(&self, phase: Phase) -> LakeResult<PhaseStatus> {
        let inner = self.inner.lock().await;

        Ok(inner.document.phase(phase))
    }

    async fn set_phase_status(&self, phase: Phase, status: PhaseStatus) -> LakeResult<()> {
        let mut inner = self.inner.lock().await;
        let previous = inner.document.phases.insert(phase, status);

        if let Err(err) = inner.persist().await {
            match previous {
                Some(previous) => inner.document.phases.insert(phase, previous),
                None => inner.document.phases.remove(&phase),
            };
            return Err(err);
        }

        Ok(())
    }

    async fn get_chunk_statuses(&self, phase: Phase) -> LakeResult<BTreeMap<ChunkId, ChunkStatus>> {
        let inner = self.inner.lock().await;

        Ok(inner.document.chunks(phase))
    }

    async fn update_chunk_statuses(
        &self,
        phase: Phase,
        updates: Vec<(ChunkId, ChunkStatus)>,
    ) -> LakeResult<()> {
        let mut inner = self.inner.lock().await;
        let previous = inner.document.clone();
        inner.document.apply_chunk_updates(phase, updates);

        if let Err(err) = inner.persist().await {
            inner.document = previous;
            return Err(err);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn statuses_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("status.json");

        let store = JsonFileStatusStore::open(&path).unwrap();
        store
            .set_phase_status(Phase::Reorganize, PhaseStatus::completed())
            .await
            .unwrap();
        store
            .update_chunk_status(Phase::Commit, ChunkId(2), ChunkStatus::Failed {
                reason: "disk full".to_string(),
            })
            .await
            .unwrap();

        let reopened = JsonFileStatusStore::open(&path).unwrap();
        assert!(
            reopened
                .get_phase_status(Phase::Reorganize)
                .await
                .unwrap()
                .is_completed()
        );
        assert_eq!(
            reopened.get_phase_status(Phase::Commit).await.unwrap(),
            PhaseStatus::NotStarted
        );
        let chunks = reopened.get_chunk_statuses(Phase::Commit).await.unwrap();
        assert!(chunks[&ChunkId(2)].is_failed());
    }

    #[test]
    fn malformed_document_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.json");
        fs::write(&path, b"{ not json").unwrap();

        let err = JsonFileStatusStore::open(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeserializationError);
    }
}
