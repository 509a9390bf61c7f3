//! Filesystem document store
//!
//! One pretty-printed JSON document per VCA (`<dir>/<vca_id>.json`) and per
//! rollup (`<dir>/<batch_id>.json`). Writes go to a temp file in the same
//! directory, are fsynced, then renamed into place, so readers never see a
//! partial document. New VCAs and all rollups are linked without replacing an
//! existing file; only consent updates overwrite.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use crate::domain::{BatchId, RollupEntry, VcaId, VcaRecord};

use super::{Result, RollupStore, VcaError, VcaStore};

/// Document store rooted at the proofs directory
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    dir: PathBuf,
}

impl FsDocumentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vca_path(&self, vca_id: &VcaId) -> PathBuf {
        self.dir.join(format!("{vca_id}.json"))
    }

    pub fn rollup_path(&self, batch_id: &BatchId) -> PathBuf {
        self.dir.join(format!("{batch_id}.json"))
    }

    async fn write_document<T: Serialize>(
        &self,
        path: PathBuf,
        doc: &T,
        mode: WriteMode,
    ) -> Result<()> {
        let mut bytes = serde_json::to_vec_pretty(doc)?;
        bytes.push(b'\n');
        let dir = self.dir.clone();

        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &bytes, mode))
            .await
            .map_err(|e| VcaError::Internal(format!("write task failed: {e}")))?
    }

    async fn read_document<T: DeserializeOwned>(&self, kind: &str, path: &Path) -> Result<T> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VcaError::not_found(kind, path.display()));
            }
            Err(e) => return Err(VcaError::io(path, e)),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Replace,
    /// Fail with `AlreadyExists` instead of replacing the target
    CreateNew(&'static str),
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8], mode: WriteMode) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| VcaError::io(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| VcaError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| VcaError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| VcaError::io(tmp.path(), e))?;
    match mode {
        WriteMode::Replace => {
            tmp.persist(path).map_err(|e| VcaError::io(path, e.error))?;
        }
        WriteMode::CreateNew(kind) => {
            tmp.persist_noclobber(path).map_err(|e| {
                if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                    VcaError::already_exists(kind, path.display())
                } else {
                    VcaError::io(path, e.error)
                }
            })?;
        }
    }

    debug!(path = %path.display(), bytes = bytes.len(), "document written");
    Ok(())
}

#[async_trait]
impl VcaStore for FsDocumentStore {
    #[instrument(skip(self, vca), fields(vca_id = %vca.vca_id()))]
    async fn create_vca(&self, vca: &VcaRecord) -> Result<()> {
        self.write_document(self.vca_path(vca.vca_id()), vca, WriteMode::CreateNew("VCA"))
            .await
    }

    #[instrument(skip(self, vca), fields(vca_id = %vca.vca_id()))]
    async fn save_vca(&self, vca: &VcaRecord) -> Result<()> {
        self.write_document(self.vca_path(vca.vca_id()), vca, WriteMode::Replace)
            .await
    }

    async fn load_vca(&self, vca_id: &VcaId) -> Result<VcaRecord> {
        self.read_document("VCA", &self.vca_path(vca_id)).await
    }

    async fn vca_exists(&self, vca_id: &VcaId) -> Result<bool> {
        let path = self.vca_path(vca_id);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| VcaError::io(path, e))
    }
}

#[async_trait]
impl RollupStore for FsDocumentStore {
    #[instrument(skip(self, rollup), fields(batch_id = %rollup.batch_id))]
    async fn save_rollup(&self, rollup: &RollupEntry) -> Result<()> {
        self.write_document(
            self.rollup_path(&rollup.batch_id),
            rollup,
            WriteMode::CreateNew("batch"),
        )
        .await
    }

    async fn load_rollup(&self, batch_id: &BatchId) -> Result<RollupEntry> {
        self.read_document("batch", &self.rollup_path(batch_id))
            .await
    }

    async fn rollup_exists(&self, batch_id: &BatchId) -> Result<bool> {
        let path = self.rollup_path(batch_id);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| VcaError::io(path, e))
    }
}
