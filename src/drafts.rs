use crate::model::DraftEntries;
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::fmt;

/// One draft slot per (evaluation, class) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftStoreKey {
    pub evaluation_id: i64,
    pub class_id: i64,
}

impl DraftStoreKey {
    pub fn new(evaluation_id: i64, class_id: i64) -> Self {
        Self {
            evaluation_id,
            class_id,
        }
    }
}

impl fmt::Display for DraftStoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "evaluation-{}-class-{}",
            self.evaluation_id, self.class_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub entries: DraftEntries,
    pub revision: i64,
    pub updated_at: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("draft changed elsewhere (expected revision {expected}, found {actual})")]
    Conflict { expected: i64, actual: i64 },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Key-value persistence for in-progress answers.
///
/// `expected_revision` enables optimistic concurrency: `Some(n)` only writes
/// when the stored revision is `n` (`0` meaning "no draft yet"); `None` is
/// last-write-wins. Every save replaces the whole map.
pub trait DraftStore {
    fn load(&mut self, key: DraftStoreKey) -> anyhow::Result<Option<Draft>>;
    fn save(
        &mut self,
        key: DraftStoreKey,
        entries: &DraftEntries,
        expected_revision: Option<i64>,
    ) -> Result<i64, DraftError>;
    /// Returns whether a slot was actually removed.
    fn clear(&mut self, key: DraftStoreKey) -> anyhow::Result<bool>;
    fn keys(&mut self) -> anyhow::Result<Vec<DraftStoreKey>>;
}

fn check_revision(expected: Option<i64>, actual: i64) -> Result<(), DraftError> {
    match expected {
        Some(e) if e != actual => Err(DraftError::Conflict {
            expected: e,
            actual,
        }),
        _ => Ok(()),
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub struct SqliteDraftStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteDraftStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl DraftStore for SqliteDraftStore<'_> {
    fn load(&mut self, key: DraftStoreKey) -> anyhow::Result<Option<Draft>> {
        let row: Option<(String, i64, String)> = self
            .conn
            .query_row(
                "SELECT payload, revision, updated_at FROM drafts WHERE store_key = ?",
                [key.to_string()],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        let Some((payload, revision, updated_at)) = row else {
            return Ok(None);
        };
        let entries: DraftEntries = serde_json::from_str(&payload)
            .with_context(|| format!("stored draft {} is invalid JSON", key))?;
        Ok(Some(Draft {
            entries,
            revision,
            updated_at,
        }))
    }

    fn save(
        &mut self,
        key: DraftStoreKey,
        entries: &DraftEntries,
        expected_revision: Option<i64>,
    ) -> Result<i64, DraftError> {
        let current: i64 = self
            .conn
            .query_row(
                "SELECT revision FROM drafts WHERE store_key = ?",
                [key.to_string()],
                |r| r.get(0),
            )
            .optional()
            .context("failed to read draft revision")?
            .unwrap_or(0);
        check_revision(expected_revision, current)?;

        let payload = serde_json::to_string(entries).context("failed to serialize draft")?;
        let next = current + 1;
        self.conn
            .execute(
                "INSERT INTO drafts(store_key, evaluation_id, class_id, payload, revision, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?)
                 ON CONFLICT(store_key) DO UPDATE SET
                   payload = excluded.payload,
                   revision = excluded.revision,
                   updated_at = excluded.updated_at",
                (
                    key.to_string(),
                    key.evaluation_id,
                    key.class_id,
                    payload,
                    next,
                    now_rfc3339(),
                ),
            )
            .context("failed to write draft")?;
        Ok(next)
    }

    fn clear(&mut self, key: DraftStoreKey) -> anyhow::Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM drafts WHERE store_key = ?", [key.to_string()])?;
        Ok(n > 0)
    }

    fn keys(&mut self) -> anyhow::Result<Vec<DraftStoreKey>> {
        let mut stmt = self
            .conn
            .prepare("SELECT evaluation_id, class_id FROM drafts ORDER BY evaluation_id, class_id")?;
        let keys = stmt
            .query_map([], |r| Ok(DraftStoreKey::new(r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

/// Keeps the serialized form, like the browser storage it replaces, so a load
/// always goes through the JSON round trip.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryDraftStore {
    slots: std::collections::BTreeMap<DraftStoreKey, (String, i64, String)>,
}

#[cfg(test)]
impl DraftStore for MemoryDraftStore {
    fn load(&mut self, key: DraftStoreKey) -> anyhow::Result<Option<Draft>> {
        let Some((payload, revision, updated_at)) = self.slots.get(&key) else {
            return Ok(None);
        };
        Ok(Some(Draft {
            entries: serde_json::from_str(payload)?,
            revision: *revision,
            updated_at: updated_at.clone(),
        }))
    }

    fn save(
        &mut self,
        key: DraftStoreKey,
        entries: &DraftEntries,
        expected_revision: Option<i64>,
    ) -> Result<i64, DraftError> {
        let current = self.slots.get(&key).map(|s| s.1).unwrap_or(0);
        check_revision(expected_revision, current)?;
        let payload = serde_json::to_string(entries).context("failed to serialize draft")?;
        self.slots.insert(key, (payload, current + 1, now_rfc3339()));
        Ok(current + 1)
    }

    fn clear(&mut self, key: DraftStoreKey) -> anyhow::Result<bool> {
        Ok(self.slots.remove(&key).is_some())
    }

    fn keys(&mut self) -> anyhow::Result<Vec<DraftStoreKey>> {
        Ok(self.slots.keys().copied().collect())
    }
}
