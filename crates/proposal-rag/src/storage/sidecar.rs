//! JSON sidecar files for processed proposals

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Metadata persisted next to the relational record of a proposal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalSidecar {
    /// Proposal id, also the file stem
    pub id: Uuid,
    pub document_id: Uuid,
    pub filename: String,
    pub client_name: Option<String>,
    pub industry: Option<String>,
    /// Upload date, `YYYY-MM-DD`
    pub date: String,
    pub status: String,
    pub content: String,
    /// Block type name to section text
    pub sections: BTreeMap<String, String>,
    pub upload_time: DateTime<Utc>,
    pub file_path: Option<String>,
    pub section_count: usize,
    pub keyword_count: usize,
    pub entity_count: usize,
}

/// Directory of `{proposal_id}.json` files
#[derive(Debug, Clone)]
pub struct SidecarStore {
    dir: PathBuf,
}

impl SidecarStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Write the sidecar through a temp file so readers never see a partial document
    pub async fn write(&self, sidecar: &ProposalSidecar) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::storage(format!("Failed to create {}: {}", self.dir.display(), e))
        })?;

        let path = self.path_for(&sidecar.id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(sidecar)?;

        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| Error::storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::storage(format!("Failed to move {}: {}", path.display(), e)))?;

        tracing::debug!("Wrote sidecar {}", path.display());
        Ok(path)
    }

    /// `None` when no sidecar exists for `id`
    pub async fn read(&self, id: &Uuid) -> Result<Option<ProposalSidecar>> {
        match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
