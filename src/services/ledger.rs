//! Status ledger: one record per `(storeId, fileName)` tracking a photo
//! from PENDING to COMPLETED or FAILED.
//!
//! The backing table only offers partition-key equality plus sort-key prefix
//! queries, so lookups by file name scan the `PENDING#` prefix and filter in
//! memory. A transition deletes the old item and inserts the rewritten one;
//! a crash between the two leaves no record at all, and two deliveries of the
//! same job may race here. Neither case is guarded.

use crate::{
    errors::{InfraError, InfraResult},
    models::photo_record::{PhotoRecord, PhotoStatus, SortKey, partition_key},
    services::retry::{RetryPolicy, retry},
};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Raw item as stored in the sorted key-value table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct LedgerItem {
    pub pk: String,
    pub sk: String,
    pub file_name: String,
    pub file_key: Option<String>,
    pub upload_timestamp: Option<String>,
    pub status: String,
    pub completed_at: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl From<&PhotoRecord> for LedgerItem {
    fn from(record: &PhotoRecord) -> Self {
        Self {
            pk: record.partition_key(),
            sk: record.sort_key.encode(),
            file_name: record.file_name.clone(),
            file_key: record.file_key.clone(),
            upload_timestamp: record.upload_timestamp.clone(),
            status: record.status.as_str().to_string(),
            completed_at: record.completed_at.clone(),
            result: record.result.clone(),
            error: record.error.clone(),
        }
    }
}

impl TryFrom<LedgerItem> for PhotoRecord {
    type Error = InfraError;

    fn try_from(item: LedgerItem) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| InfraError::CorruptItem {
            pk: item.pk.clone(),
            sk: item.sk.clone(),
            reason,
        };
        let sort_key = SortKey::parse(&item.sk).map_err(corrupt)?;
        let store_id = PhotoRecord::store_id_from_partition(&item.pk)
            .ok_or_else(|| corrupt("partition key lacks #PHOTO suffix".into()))?
            .to_string();

        Ok(PhotoRecord {
            store_id,
            // The sort key, not the `status` attribute, is authoritative.
            status: sort_key.status,
            sort_key,
            file_name: item.file_name,
            file_key: item.file_key,
            upload_timestamp: item.upload_timestamp,
            completed_at: item.completed_at,
            result: item.result,
            error: item.error,
        })
    }
}

/// Sorted key-value store queried by partition key + sort-key prefix.
#[async_trait]
pub trait LedgerTable: Send + Sync {
    /// Items under `pk` whose sort key starts with `sk_prefix`, ascending.
    async fn query_prefix(&self, pk: &str, sk_prefix: &str) -> InfraResult<Vec<LedgerItem>>;

    /// Insert or overwrite the item at `(pk, sk)`.
    async fn put_item(&self, item: &LedgerItem) -> InfraResult<()>;

    /// Remove the item at `(pk, sk)`; missing items are ignored.
    async fn delete_item(&self, pk: &str, sk: &str) -> InfraResult<()>;
}

#[derive(Clone)]
pub struct SqliteLedgerTable {
    db: Arc<SqlitePool>,
}

impl SqliteLedgerTable {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LedgerTable for SqliteLedgerTable {
    async fn query_prefix(&self, pk: &str, sk_prefix: &str) -> InfraResult<Vec<LedgerItem>> {
        let items = sqlx::query_as::<_, LedgerItem>(
            "SELECT pk, sk, file_name, file_key, upload_timestamp, status,
                    completed_at, result, error
             FROM photo_records
             WHERE pk = ? AND substr(sk, 1, length(?)) = ?
             ORDER BY sk ASC",
        )
        .bind(pk)
        .bind(sk_prefix)
        .bind(sk_prefix)
        .fetch_all(&*self.db)
        .await?;
        Ok(items)
    }

    async fn put_item(&self, item: &LedgerItem) -> InfraResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO photo_records (
                pk, sk, file_name, file_key, upload_timestamp, status,
                completed_at, result, error
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.pk)
        .bind(&item.sk)
        .bind(&item.file_name)
        .bind(&item.file_key)
        .bind(&item.upload_timestamp)
        .bind(&item.status)
        .bind(&item.completed_at)
        .bind(&item.result)
        .bind(&item.error)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn delete_item(&self, pk: &str, sk: &str) -> InfraResult<()> {
        sqlx::query("DELETE FROM photo_records WHERE pk = ? AND sk = ?")
            .bind(pk)
            .bind(sk)
            .execute(&*self.db)
            .await?;
        Ok(())
    }
}

/// Lifecycle operations over a [`LedgerTable`], each table call retried
/// under the stage's own policy.
#[derive(Clone)]
pub struct StatusLedger {
    table: Arc<dyn LedgerTable>,
    retry: RetryPolicy,
}

impl StatusLedger {
    pub fn new(table: Arc<dyn LedgerTable>, retry: RetryPolicy) -> Self {
        Self { table, retry }
    }

    fn now() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Oldest record for `file_name` currently in `status`.
    pub async fn find_by_name(
        &self,
        store_id: &str,
        file_name: &str,
        status: PhotoStatus,
    ) -> InfraResult<Option<PhotoRecord>> {
        let pk = partition_key(store_id);
        let prefix = status.sort_key_prefix();
        let items = retry(&self.retry, "ledger.query", || {
            self.table.query_prefix(&pk, &prefix)
        })
        .await?;

        items
            .into_iter()
            .find(|item| item.file_name == file_name)
            .map(PhotoRecord::try_from)
            .transpose()
    }

    /// The record for `file_name` in whatever status it is in.
    pub async fn lookup(&self, store_id: &str, file_name: &str) -> InfraResult<Option<PhotoRecord>> {
        for status in [PhotoStatus::Pending, PhotoStatus::Completed, PhotoStatus::Failed] {
            if let Some(record) = self.find_by_name(store_id, file_name, status).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Create a PENDING record unless one already exists; returns the
    /// record's timestamp either way.
    #[instrument(skip(self))]
    pub async fn create_if_absent(
        &self,
        store_id: &str,
        file_name: &str,
        file_key: &str,
    ) -> InfraResult<String> {
        if let Some(existing) = self
            .find_by_name(store_id, file_name, PhotoStatus::Pending)
            .await?
        {
            info!(
                store_id,
                file_name,
                timestamp = %existing.sort_key.timestamp,
                "pending record already exists"
            );
            return Ok(existing.sort_key.timestamp);
        }

        let timestamp = Self::now();
        let record = PhotoRecord::pending(store_id, file_name, file_key, &timestamp);
        let item = LedgerItem::from(&record);
        retry(&self.retry, "ledger.put", || self.table.put_item(&item)).await?;

        info!(store_id, file_name, sk = %item.sk, "ledger record created");
        Ok(timestamp)
    }

    /// Move the PENDING record for `file_name` to `status`. Returns the new
    /// record, or `None` when there was no pending record to move.
    #[instrument(skip(self, result, error))]
    pub async fn transition(
        &self,
        store_id: &str,
        file_name: &str,
        status: PhotoStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> InfraResult<Option<PhotoRecord>> {
        if !status.is_terminal() {
            warn!(store_id, file_name, %status, "refusing transition to a non-terminal status");
            return Ok(None);
        }

        let Some(existing) = self
            .find_by_name(store_id, file_name, PhotoStatus::Pending)
            .await?
        else {
            info!(store_id, file_name, %status, "no pending record found, skipping transition");
            return Ok(None);
        };

        let updated = existing.transitioned(status, &Self::now(), result, error);
        let old_pk = existing.partition_key();
        let old_sk = existing.sort_key.encode();
        let new_item = LedgerItem::from(&updated);

        retry(&self.retry, "ledger.delete", || {
            self.table.delete_item(&old_pk, &old_sk)
        })
        .await?;
        retry(&self.retry, "ledger.put", || self.table.put_item(&new_item)).await?;

        info!(
            store_id,
            file_name,
            %status,
            new_sk = %new_item.sk,
            "ledger record updated"
        );
        Ok(Some(updated))
    }
}
