//! src/services/blob_store.rs
//!
//! Blob storage for photo payloads. `DiskBlobStore` keeps object bytes on
//! local disk sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}` and
//! per-object metadata (content type, size, etag) in SQLite.
//!
//! A "move" between folders is a copy followed by a delete and is not atomic;
//! callers retry each half independently.

use crate::{
    errors::{InfraError, InfraResult},
    models::blob::BlobObject,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Put/copy/delete operations against an object store addressed by bucket + key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `content` at `key`, overwriting any existing object.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        content: Bytes,
        content_type: Option<&str>,
    ) -> InfraResult<BlobObject>;

    /// Object metadata without reading the payload.
    async fn head(&self, bucket: &str, key: &str) -> InfraResult<BlobObject>;

    /// Object metadata and payload.
    async fn get(&self, bucket: &str, key: &str) -> InfraResult<(BlobObject, Bytes)>;

    /// Copy an object within one bucket. Fails with `BlobNotFound` when the
    /// source is missing.
    async fn copy(&self, bucket: &str, source_key: &str, destination_key: &str)
    -> InfraResult<BlobObject>;

    /// Remove an object. Deleting a missing key succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> InfraResult<()>;
}

#[derive(Clone)]
pub struct DiskBlobStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl DiskBlobStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Rejects empty or oversized keys, absolute paths, `..` segments and
    /// control characters.
    fn ensure_key_safe(key: &str) -> InfraResult<()> {
        let unsafe_key = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.split('/').any(|segment| segment == "..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if unsafe_key {
            return Err(InfraError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// First two bytes of MD5(bucket/key) as hex, to spread files across
    /// directories.
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_object(&self, bucket: &str, key: &str) -> InfraResult<BlobObject> {
        sqlx::query_as::<_, BlobObject>(
            "SELECT bucket, key, content_type, size_bytes, etag, last_modified
             FROM blob_objects WHERE bucket = ? AND key = ?",
        )
        .bind(bucket)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => InfraError::BlobNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => InfraError::Sqlx(other),
        })
    }

    async fn upsert_object(&self, object: &BlobObject) -> InfraResult<()> {
        sqlx::query(
            r#"
            INSERT INTO blob_objects (bucket, key, content_type, size_bytes, etag, last_modified)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(&object.bucket)
        .bind(&object.key)
        .bind(&object.content_type)
        .bind(object.size_bytes)
        .bind(&object.etag)
        .bind(object.last_modified)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Write `content` to a temp file beside `file_path`, fsync, then rename
    /// into place.
    async fn write_atomically(file_path: &Path, content: &[u8]) -> InfraResult<()> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            InfraError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(content).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, file_path).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(InfraError::Io(err));
        }
        Ok(())
    }

    /// Remove empty directories from `start` upward, stopping at `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for DiskBlobStore {
    #[tracing::instrument(skip(self, content), fields(size = content.len()))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        content: Bytes,
        content_type: Option<&str>,
    ) -> InfraResult<BlobObject> {
        Self::ensure_key_safe(key)?;
        let file_path = self.object_path(bucket, key);
        Self::write_atomically(&file_path, &content).await?;

        let object = BlobObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: content_type.map(str::to_string),
            size_bytes: content.len() as i64,
            etag: format!("{:x}", md5::compute(&content)),
            last_modified: Utc::now(),
        };

        if let Err(err) = self.upsert_object(&object).await {
            let _ = fs::remove_file(&file_path).await;
            return Err(err);
        }
        debug!(bucket, key, "stored object");
        Ok(object)
    }

    async fn head(&self, bucket: &str, key: &str) -> InfraResult<BlobObject> {
        Self::ensure_key_safe(key)?;
        self.fetch_object(bucket, key).await
    }

    async fn get(&self, bucket: &str, key: &str) -> InfraResult<(BlobObject, Bytes)> {
        Self::ensure_key_safe(key)?;
        let object = self.fetch_object(bucket, key).await?;
        let content = fs::read(self.object_path(bucket, key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    InfraError::BlobNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    InfraError::Io(err)
                }
            })?;
        Ok((object, Bytes::from(content)))
    }

    #[tracing::instrument(skip(self))]
    async fn copy(
        &self,
        bucket: &str,
        source_key: &str,
        destination_key: &str,
    ) -> InfraResult<BlobObject> {
        Self::ensure_key_safe(source_key)?;
        Self::ensure_key_safe(destination_key)?;
        let (source, content) = self.get(bucket, source_key).await?;

        let file_path = self.object_path(bucket, destination_key);
        Self::write_atomically(&file_path, &content).await?;

        let copied = BlobObject {
            key: destination_key.to_string(),
            last_modified: Utc::now(),
            ..source
        };
        if let Err(err) = self.upsert_object(&copied).await {
            let _ = fs::remove_file(&file_path).await;
            return Err(err);
        }
        Ok(copied)
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, bucket: &str, key: &str) -> InfraResult<()> {
        Self::ensure_key_safe(key)?;
        let result = sqlx::query("DELETE FROM blob_objects WHERE bucket = ? AND key = ?")
            .bind(bucket)
            .bind(key)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            debug!(bucket, key, "delete of missing object");
        }

        let file_path = self.object_path(bucket, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(InfraError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }
}
