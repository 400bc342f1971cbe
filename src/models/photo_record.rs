//! Ledger representation of a photo's lifecycle.
//!
//! The ledger stores every record under partition key `{storeId}#PHOTO` with
//! sort key `{status}#{timestamp}#{fileName}`. The status segment of the sort
//! key is the only authoritative state marker, so it is parsed into
//! [`PhotoStatus`] here and nowhere else.

use std::{fmt, str::FromStr};

const PARTITION_SUFFIX: &str = "#PHOTO";
const SEGMENT_SEPARATOR: char = '#';

/// Lifecycle state of a photo. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoStatus {
    Pending,
    Completed,
    Failed,
}

impl PhotoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoStatus::Pending => "PENDING",
            PhotoStatus::Completed => "COMPLETED",
            PhotoStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PhotoStatus::Pending)
    }

    /// Sort-key prefix selecting every record currently in this status.
    pub fn sort_key_prefix(&self) -> String {
        format!("{}{}", self.as_str(), SEGMENT_SEPARATOR)
    }
}

impl fmt::Display for PhotoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhotoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PhotoStatus::Pending),
            "COMPLETED" => Ok(PhotoStatus::Completed),
            "FAILED" => Ok(PhotoStatus::Failed),
            other => Err(format!("unknown photo status `{}`", other)),
        }
    }
}

/// Partition key shared by every photo record of a store.
pub fn partition_key(store_id: &str) -> String {
    format!("{}{}", store_id, PARTITION_SUFFIX)
}

/// Decoded `{status}#{timestamp}#{fileName}` sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub status: PhotoStatus,
    pub timestamp: String,
    pub file_name: String,
}

impl SortKey {
    pub fn new(status: PhotoStatus, timestamp: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            status,
            timestamp: timestamp.into(),
            file_name: file_name.into(),
        }
    }

    /// The same record position with a different status segment.
    pub fn with_status(&self, status: PhotoStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    pub fn encode(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.status.as_str(),
            self.timestamp,
            self.file_name,
            sep = SEGMENT_SEPARATOR
        )
    }

    /// File names may themselves contain `#`, so only the first two
    /// separators are significant.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut parts = raw.splitn(3, SEGMENT_SEPARATOR);
        let status = parts
            .next()
            .ok_or_else(|| format!("empty sort key `{}`", raw))?
            .parse::<PhotoStatus>()?;
        let timestamp = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("sort key `{}` has no timestamp", raw))?;
        let file_name = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("sort key `{}` has no file name", raw))?;
        Ok(Self::new(status, timestamp, file_name))
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// A photo record as held by the status ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRecord {
    pub store_id: String,
    pub sort_key: SortKey,
    pub file_name: String,
    pub file_key: Option<String>,
    pub upload_timestamp: Option<String>,
    pub status: PhotoStatus,
    pub completed_at: Option<String>,
    /// Serialized outcome returned by the media API.
    pub result: Option<String>,
    pub error: Option<String>,
}

impl PhotoRecord {
    /// A freshly ingested record awaiting upload.
    pub fn pending(store_id: &str, file_name: &str, file_key: &str, timestamp: &str) -> Self {
        Self {
            store_id: store_id.to_string(),
            sort_key: SortKey::new(PhotoStatus::Pending, timestamp, file_name),
            file_name: file_name.to_string(),
            file_key: Some(file_key.to_string()),
            upload_timestamp: Some(timestamp.to_string()),
            status: PhotoStatus::Pending,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// The record that replaces this one once it reaches `status`.
    pub fn transitioned(
        &self,
        status: PhotoStatus,
        completed_at: &str,
        result: Option<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            store_id: self.store_id.clone(),
            sort_key: self.sort_key.with_status(status),
            file_name: self.file_name.clone(),
            file_key: self.file_key.clone(),
            upload_timestamp: self.upload_timestamp.clone(),
            status,
            completed_at: Some(completed_at.to_string()),
            result,
            error,
        }
    }

    pub fn partition_key(&self) -> String {
        partition_key(&self.store_id)
    }

    /// Store id recovered from a `{storeId}#PHOTO` partition key.
    pub fn store_id_from_partition(pk: &str) -> Option<&str> {
        pk.strip_suffix(PARTITION_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_key_round_trips_through_its_encoding() {
        let key = SortKey::new(PhotoStatus::Pending, "2024-05-01T10:00:00.000000Z", "a.jpg");
        assert_eq!(key.encode(), "PENDING#2024-05-01T10:00:00.000000Z#a.jpg");
        assert_eq!(SortKey::parse(&key.encode()).unwrap(), key);
    }

    #[test]
    fn file_names_may_contain_separators() {
        let key = SortKey::parse("FAILED#2024-05-01T10:00:00Z#shop#front.png").unwrap();
        assert_eq!(key.status, PhotoStatus::Failed);
        assert_eq!(key.file_name, "shop#front.png");
    }

    #[test]
    fn malformed_sort_keys_are_rejected() {
        assert!(SortKey::parse("DONE#2024#a.jpg").is_err());
        assert!(SortKey::parse("PENDING#2024").is_err());
        assert!(SortKey::parse("PENDING##a.jpg").is_err());
    }

    #[test]
    fn transition_rewrites_only_the_status_segment() {
        let pending = PhotoRecord::pending("dc", "a.jpg", "local-seo-photos/uploads/dc/x-a.jpg", "t1");
        let done = pending.transitioned(PhotoStatus::Completed, "t2", Some("{}".into()), None);

        assert_eq!(done.sort_key.encode(), "COMPLETED#t1#a.jpg");
        assert_eq!(done.status, PhotoStatus::Completed);
        assert_eq!(done.file_key, pending.file_key);
        assert_eq!(done.completed_at.as_deref(), Some("t2"));
        assert!(done.status.is_terminal());
        assert!(!pending.status.is_terminal());
    }

    #[test]
    fn partition_key_carries_the_store() {
        assert_eq!(partition_key("towson"), "towson#PHOTO");
        assert_eq!(PhotoRecord::store_id_from_partition("towson#PHOTO"), Some("towson"));
        assert_eq!(PhotoRecord::store_id_from_partition("towson"), None);
    }
}
