use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access membership document: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed membership document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A donation we could tie to a Discord identity but not (yet) to a guild
/// member. Also used for donations with no identity at all (`unknown`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRecord {
    pub tier: Option<String>,
    pub expire_date: NaiveDate,
    pub payment_amount: f64,
}

/// An active membership. The tier is recomputed from `payment_amount` when
/// needed rather than stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    pub expire_date: NaiveDate,
    pub payment_amount: f64,
}

/// The whole persisted state. Read in full and written in full around every
/// logical operation; there is no field-level access. Record fields serialize
/// camelCase so documents written by earlier deployments keep loading.
///
/// An identity is never present in both `pending` and `members` at once;
/// promotion removes from one and inserts into the other within a single
/// write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipDocument {
    pub unknown: Vec<PendingRecord>,
    pub pending: BTreeMap<String, PendingRecord>,
    pub members: BTreeMap<String, MemberRecord>,
}

#[derive(Clone)]
pub struct MembershipStore {
    path: PathBuf,
}

impl MembershipStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Creates an empty document if none exists yet, so a fresh deployment
    /// starts without a hand-written seed file.
    pub async fn ensure_exists(&self) -> Result<(), StoreError> {
        if tokio::fs::try_exists(&self.path).await? {
            return Ok(());
        }
        debug!("initializing empty membership document at {:?}", self.path);
        self.write(&MembershipDocument::default()).await
    }

    pub async fn read(&self) -> Result<MembershipDocument, StoreError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        debug!(
            "read membership document from {:?} ({} bytes)",
            self.path,
            content.len()
        );
        Ok(serde_json::from_str(&content)?)
    }

    /// Overwrites all previous file contents.
    pub async fn write(&self, document: &MembershipDocument) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(document)?;
        tokio::fs::write(&self.path, content.as_bytes()).await?;
        debug!(
            "wrote membership document to {:?} ({} bytes)",
            self.path,
            content.len()
        );
        Ok(())
    }
}
