//! Record of submitted user operations.
//!
//! An operation is journaled as soon as the bundler accepts it and before
//! the receipt is awaited, so an interrupted purchase can be looked up again
//! by its hash instead of being resubmitted.

use alloy_primitives::U256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tick3t_common::{Address, Tick3tError};
use tracing::debug;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("unknown user operation {0}")]
    NotFound(String),
}

impl From<JournalError> for Tick3tError {
    fn from(err: JournalError) -> Self {
        Tick3tError::Unknown(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Submitted,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub user_op_hash: String,
    pub account: Address,
    /// Contract the operation calls.
    pub target: Address,
    /// Wei attached, in decimal.
    pub value: String,
    pub submitted_at: DateTime<Utc>,
    pub status: OperationStatus,
    pub transaction_hash: Option<String>,
    pub error: Option<String>,
}

impl JournalEntry {
    pub fn submitted(user_op_hash: impl Into<String>, account: Address, target: Address, value: U256) -> Self {
        Self {
            user_op_hash: user_op_hash.into(),
            account,
            target,
            value: value.to_string(),
            submitted_at: Utc::now(),
            status: OperationStatus::Submitted,
            transaction_hash: None,
            error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == OperationStatus::Submitted
    }
}

/// Pluggable backend for the operation journal
#[async_trait]
pub trait OperationJournal: Send + Sync {
    async fn record_submitted(&self, entry: JournalEntry) -> Result<(), JournalError>;

    async fn mark_confirmed(&self, user_op_hash: &str, transaction_hash: &str) -> Result<(), JournalError>;

    async fn mark_failed(&self, user_op_hash: &str, error: &str) -> Result<(), JournalError>;

    /// Submitted operations of `account` still awaiting a receipt, oldest first.
    async fn pending(&self, account: &Address) -> Result<Vec<JournalEntry>, JournalError>;

    async fn entries(&self) -> Result<Vec<JournalEntry>, JournalError>;
}

fn apply_update(
    entries: &mut HashMap<String, JournalEntry>,
    user_op_hash: &str,
    update: impl FnOnce(&mut JournalEntry),
) -> Result<(), JournalError> {
    let entry = entries
        .get_mut(user_op_hash)
        .ok_or_else(|| JournalError::NotFound(user_op_hash.to_string()))?;
    update(entry);
    Ok(())
}

fn sorted(entries: impl Iterator<Item = JournalEntry>) -> Vec<JournalEntry> {
    let mut out: Vec<_> = entries.collect();
    out.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
    out
}

/// In-memory implementation for testing
#[derive(Default)]
pub struct MemoryJournal {
    entries: Mutex<HashMap<String, JournalEntry>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, JournalEntry>) -> T) -> T {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

#[async_trait]
impl OperationJournal for MemoryJournal {
    async fn record_submitted(&self, entry: JournalEntry) -> Result<(), JournalError> {
        self.with_entries(|entries| {
            entries.insert(entry.user_op_hash.clone(), entry);
        });
        Ok(())
    }

    async fn mark_confirmed(&self, user_op_hash: &str, transaction_hash: &str) -> Result<(), JournalError> {
        self.with_entries(|entries| {
            apply_update(entries, user_op_hash, |e| {
                e.status = OperationStatus::Confirmed;
                e.transaction_hash = Some(transaction_hash.to_string());
            })
        })
    }

    async fn mark_failed(&self, user_op_hash: &str, error: &str) -> Result<(), JournalError> {
        self.with_entries(|entries| {
            apply_update(entries, user_op_hash, |e| {
                e.status = OperationStatus::Failed;
                e.error = Some(error.to_string());
            })
        })
    }

    async fn pending(&self, account: &Address) -> Result<Vec<JournalEntry>, JournalError> {
        Ok(self.with_entries(|entries| {
            sorted(
                entries
                    .values()
                    .filter(|e| e.account == *account && e.is_pending())
                    .cloned(),
            )
        }))
    }

    async fn entries(&self) -> Result<Vec<JournalEntry>, JournalError> {
        Ok(self.with_entries(|entries| sorted(entries.values().cloned())))
    }
}

/// JSON file journal. Every update rewrites the file through a temporary
/// sibling and a rename.
pub struct FileJournal {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn load(&self) -> Result<HashMap<String, JournalEntry>, JournalError> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) if raw.is_empty() => Ok(HashMap::new()),
            Ok(raw) => {
                let list: Vec<JournalEntry> = serde_json::from_slice(&raw)?;
                Ok(list.into_iter().map(|e| (e.user_op_hash.clone(), e)).collect())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, entries: &HashMap<String, JournalEntry>) -> Result<(), JournalError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let list = sorted(entries.values().cloned());
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&list)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), entries = list.len(), "journal written");
        Ok(())
    }

    async fn update(
        &self,
        user_op_hash: &str,
        update: impl FnOnce(&mut JournalEntry) + Send,
    ) -> Result<(), JournalError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        apply_update(&mut entries, user_op_hash, update)?;
        self.store(&entries).await
    }
}

#[async_trait]
impl OperationJournal for FileJournal {
    async fn record_submitted(&self, entry: JournalEntry) -> Result<(), JournalError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(entry.user_op_hash.clone(), entry);
        self.store(&entries).await
    }

    async fn mark_confirmed(&self, user_op_hash: &str, transaction_hash: &str) -> Result<(), JournalError> {
        let tx = transaction_hash.to_string();
        self.update(user_op_hash, move |e| {
            e.status = OperationStatus::Confirmed;
            e.transaction_hash = Some(tx);
        })
        .await
    }

    async fn mark_failed(&self, user_op_hash: &str, error: &str) -> Result<(), JournalError> {
        let error = error.to_string();
        self.update(user_op_hash, move |e| {
            e.status = OperationStatus::Failed;
            e.error = Some(error);
        })
        .await
    }

    async fn pending(&self, account: &Address) -> Result<Vec<JournalEntry>, JournalError> {
        let _guard = self.lock.lock().await;
        let entries = self.load().await?;
        Ok(sorted(
            entries
                .into_values()
                .filter(|e| e.account == *account && e.is_pending()),
        ))
    }

    async fn entries(&self) -> Result<Vec<JournalEntry>, JournalError> {
        let _guard = self.lock.lock().await;
        Ok(sorted(self.load().await?.into_values()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Address {
        Address([0x11; 20])
    }

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("tick3t-journal-{}", uuid::Uuid::new_v4()))
            .join("operations.json")
    }

    async fn exercise(journal: &dyn OperationJournal) {
        let target = Address([0x22; 20]);
        journal
            .record_submitted(JournalEntry::submitted("0xa", account(), target, U256::from(10)))
            .await
            .unwrap();
        journal
            .record_submitted(JournalEntry::submitted("0xb", account(), target, U256::from(10)))
            .await
            .unwrap();
        journal
            .record_submitted(JournalEntry::submitted("0xc", Address([0x33; 20]), target, U256::ZERO))
            .await
            .unwrap();

        assert_eq!(journal.pending(&account()).await.unwrap().len(), 2);

        journal.mark_confirmed("0xa", "0xtx").await.unwrap();
        journal.mark_failed("0xb", "AA25 invalid account nonce").await.unwrap();

        assert!(journal.pending(&account()).await.unwrap().is_empty());
        let all = journal.entries().await.unwrap();
        assert_eq!(all.len(), 3);
        let a = all.iter().find(|e| e.user_op_hash == "0xa").unwrap();
        assert_eq!(a.status, OperationStatus::Confirmed);
        assert_eq!(a.transaction_hash.as_deref(), Some("0xtx"));
        let b = all.iter().find(|e| e.user_op_hash == "0xb").unwrap();
        assert_eq!(b.status, OperationStatus::Failed);

        assert!(matches!(
            journal.mark_confirmed("0xmissing", "0xtx").await,
            Err(JournalError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_journal() {
        exercise(&MemoryJournal::new()).await;
    }

    #[tokio::test]
    async fn test_file_journal() {
        let path = temp_path();
        exercise(&FileJournal::new(&path)).await;
        assert!(path.exists());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_file_journal_survives_reopen() {
        let path = temp_path();
        {
            let journal = FileJournal::new(&path);
            journal
                .record_submitted(JournalEntry::submitted("0xa", account(), Address::ZERO, U256::from(1)))
                .await
                .unwrap();
        }
        let reopened = FileJournal::new(&path);
        let pending = reopened.pending(&account()).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].value, "1");
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let journal = FileJournal::new(temp_path());
        assert!(journal.entries().await.unwrap().is_empty());
    }
}
