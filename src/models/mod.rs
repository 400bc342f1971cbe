//! Core data models for the photo ingestion pipeline.
//!
//! Blob metadata maps onto SQLite rows via `sqlx::FromRow`; queue payloads
//! serialize as camelCase JSON via `serde`; ledger records keep their status
//! as a typed enum and only meet the string sort-key encoding at the ledger
//! boundary.

pub mod blob;
pub mod media_job;
pub mod photo_record;
