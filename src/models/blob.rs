//! Blob addressing: which bucket photos live in and how their keys encode
//! the `uploads` / `processed` / `errors` folders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Stored metadata for a single blob.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct BlobObject {
    pub bucket: String,

    /// Folder-prefixed key, e.g. `local-seo-photos/uploads/dc/{uuid}-a.jpg`.
    pub key: String,

    pub content_type: Option<String>,

    pub size_bytes: i64,

    /// MD5 of the payload.
    pub etag: String,

    pub last_modified: DateTime<Utc>,
}

/// Logical folder a photo blob sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Folder {
    Uploads,
    Processed,
    Errors,
}

impl Folder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Folder::Uploads => "uploads",
            Folder::Processed => "processed",
            Folder::Errors => "errors",
        }
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key layout `{root}/{folder}/{storeId}/{uuid}-{fileName}` inside one bucket.
#[derive(Debug, Clone)]
pub struct BlobLayout {
    pub bucket: String,
    pub root: String,
    pub public_base_url: String,
}

impl BlobLayout {
    pub fn new(
        bucket: impl Into<String>,
        root: impl Into<String>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    fn folder_prefix(&self, folder: Folder) -> String {
        format!("{}/{}/", self.root, folder)
    }

    /// A fresh, globally unique upload key.
    pub fn upload_key(&self, store_id: &str, file_name: &str) -> String {
        format!(
            "{}{}/{}-{}",
            self.folder_prefix(Folder::Uploads),
            store_id,
            Uuid::new_v4(),
            file_name
        )
    }

    pub fn is_upload_key(&self, key: &str) -> bool {
        key.starts_with(&self.folder_prefix(Folder::Uploads))
    }

    /// Rewrite an upload key into `folder`, keeping everything after the
    /// folder segment. `None` if the key is not under `uploads/`.
    pub fn relocate(&self, upload_key: &str, folder: Folder) -> Option<String> {
        let rest = upload_key.strip_prefix(&self.folder_prefix(Folder::Uploads))?;
        Some(format!("{}{}", self.folder_prefix(folder), rest))
    }

    /// URL the media API fetches the photo from.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url.trim_end_matches('/'), key)
    }
}
