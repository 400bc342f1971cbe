//! Queue payloads exchanged between the ingress and processing stages.

use crate::errors::PipelineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of a queued upload job, one per accepted photo.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaJob {
    pub file_key: String,
    pub file_name: String,
    pub store_id: String,
    pub content_type: String,
    pub uploaded_at: String,
}

/// A job body as it arrives off the queue, before required fields are checked.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct JobDraft {
    pub file_key: Option<String>,
    pub file_name: Option<String>,
    pub store_id: Option<String>,
    pub content_type: Option<String>,
    pub uploaded_at: Option<String>,
}

impl JobDraft {
    pub fn parse(body: &str) -> Result<Self, PipelineError> {
        Ok(serde_json::from_str(body)?)
    }

    /// Promote to a [`MediaJob`], naming every missing field.
    pub fn validate(&self) -> Result<MediaJob, PipelineError> {
        let missing: Vec<&str> = [
            ("fileKey", &self.file_key),
            ("fileName", &self.file_name),
            ("storeId", &self.store_id),
            ("contentType", &self.content_type),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(PipelineError::validation(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        Ok(MediaJob {
            file_key: self.file_key.clone().unwrap_or_default(),
            file_name: self.file_name.clone().unwrap_or_default(),
            store_id: self.store_id.clone().unwrap_or_default(),
            content_type: self.content_type.clone().unwrap_or_default(),
            uploaded_at: self.uploaded_at.clone().unwrap_or_default(),
        })
    }

    /// Enough of the job to record a failure and move its blob aside.
    pub fn failure_target(&self) -> Option<FailureTarget> {
        Some(FailureTarget {
            file_key: self.file_key.clone()?,
            file_name: self.file_name.clone()?,
            store_id: self.store_id.clone()?,
        })
    }
}

/// Identifies the ledger record and blob touched on the failure path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureTarget {
    pub file_key: String,
    pub file_name: String,
    pub store_id: String,
}

impl From<&MediaJob> for FailureTarget {
    fn from(job: &MediaJob) -> Self {
        Self {
            file_key: job.file_key.clone(),
            file_name: job.file_name.clone(),
            store_id: job.store_id.clone(),
        }
    }
}

/// One delivered queue message as handed to the batch driver.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecord {
    #[serde(default)]
    pub message_id: Option<String>,
    pub body: String,
    #[serde(default)]
    pub receipt_handle: Option<String>,
}

impl QueueRecord {
    /// Lenient read of one entry of an invocation event's `Records`.
    ///
    /// `body` may be a JSON string or an inline object. Anything else is
    /// carried through as its JSON text so the record fails on its own when
    /// the job body is parsed.
    pub fn from_event_record(record: &Value) -> Self {
        let text = |name: &str| match record.get(name) {
            None | Some(Value::Null) => None,
            Some(Value::String(value)) => Some(value.clone()),
            Some(other) => Some(other.to_string()),
        };
        let body = match record.get("body") {
            Some(Value::String(raw)) => raw.clone(),
            Some(other) => other.to_string(),
            None => Value::Null.to_string(),
        };

        Self {
            message_id: text("messageId"),
            body,
            receipt_handle: text("receiptHandle"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_body_uses_camel_case_fields() {
        let job = MediaJob {
            file_key: "local-seo-photos/uploads/dc/1-a.jpg".into(),
            file_name: "a.jpg".into(),
            store_id: "dc".into(),
            content_type: "image/jpeg".into(),
            uploaded_at: "2024-05-01T10:00:00Z".into(),
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["fileKey"], "local-seo-photos/uploads/dc/1-a.jpg");
        assert_eq!(value["storeId"], "dc");
        assert_eq!(value["uploadedAt"], "2024-05-01T10:00:00Z");
    }

    #[test]
    fn event_records_accept_string_or_inline_bodies() {
        let quoted = QueueRecord::from_event_record(&serde_json::json!({
            "messageId": "m1",
            "body": r#"{"fileName":"a.jpg"}"#,
            "receiptHandle": "r1",
        }));
        let inline = QueueRecord::from_event_record(&serde_json::json!({
            "body": { "fileName": "a.jpg" },
        }));

        assert_eq!(quoted.message_id.as_deref(), Some("m1"));
        assert_eq!(inline.message_id, None);
        assert_eq!(inline.receipt_handle, None);
        for record in [quoted, inline] {
            let draft = JobDraft::parse(&record.body).unwrap();
            assert_eq!(draft.file_name.as_deref(), Some("a.jpg"));
        }
    }

    #[test]
    fn event_records_without_a_body_fail_to_parse() {
        let record = QueueRecord::from_event_record(&serde_json::json!({ "messageId": "m1" }));
        let err = JobDraft::parse(&record.body).unwrap_err();
        assert_eq!(err.kind(), "MalformedMessageError");
    }

    #[test]
    fn missing_fields_are_listed_in_order() {
        let draft = JobDraft::parse(r#"{"fileName":"a.jpg","storeId":"dc"}"#).unwrap();
        let err = draft.validate().unwrap_err();
        assert_eq!(err.to_string(), "Missing required fields: fileKey, contentType");
        assert!(draft.failure_target().is_none());
    }

    #[test]
    fn failure_target_needs_key_name_and_store() {
        let draft =
            JobDraft::parse(r#"{"fileKey":"k","fileName":"a.jpg","storeId":"dc"}"#).unwrap();
        assert!(draft.validate().is_err());
        assert_eq!(
            draft.failure_target(),
            Some(FailureTarget {
                file_key: "k".into(),
                file_name: "a.jpg".into(),
                store_id: "dc".into(),
            })
        );
    }

    #[test]
    fn uploaded_at_is_optional() {
        let draft = JobDraft::parse(
            r#"{"fileKey":"k","fileName":"a.jpg","storeId":"dc","contentType":"image/png"}"#,
        )
        .unwrap();
        let job = draft.validate().unwrap();
        assert_eq!(job.uploaded_at, "");
    }

    #[test]
    fn unparseable_bodies_are_malformed() {
        let err = JobDraft::parse("not json").unwrap_err();
        assert_eq!(err.kind(), "MalformedMessageError");
    }

    #[test]
    fn receipt_handle_may_be_absent() {
        let record: QueueRecord =
            serde_json::from_str(r#"{"messageId":"m1","body":"{}"}"#).unwrap();
        assert_eq!(record.receipt_handle, None);
    }
}
