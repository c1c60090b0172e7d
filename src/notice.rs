//! Purpose: Define a stable, structured schema for non-fatal stderr notices.
//! Exports: `Notice`, `notice_json`.
//! Role: Shared contract helper for CLI diagnostics (skipped ROI structures, synthesized label keys).
//! Invariants: Notices are non-fatal and never alter stdout payloads.
//! Invariants: JSON schema is stable once published; fields are additive-only.
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: String,
    pub cmd: String,
    pub file: String,
    pub message: String,
    pub details: Map<String, Value>,
}

impl Notice {
    pub fn new(kind: &str, cmd: &str, file: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            cmd: cmd.to_string(),
            file: file.into(),
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

pub fn notice_json(notice: &Notice) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(notice.kind));
    inner.insert("cmd".to_string(), json!(notice.cmd));
    inner.insert("file".to_string(), json!(notice.file));
    inner.insert("message".to_string(), json!(notice.message));
    inner.insert("details".to_string(), Value::Object(notice.details.clone()));

    let mut outer = Map::new();
    outer.insert("notice".to_string(), Value::Object(inner));
    Value::Object(outer)
}

#[cfg(test)]
mod tests {
    use super::{Notice, notice_json};

    #[test]
    fn notice_json_has_required_fields() {
        let notice = Notice::new(
            "label_key_synthesized",
            "label-remap",
            "parc.dlabel.nii",
            "label key 2 collided with a remap target and became 1",
        )
        .with_detail("old_key", 2)
        .with_detail("new_key", 1);

        let value = notice_json(&notice);
        let obj = value
            .get("notice")
            .and_then(|v| v.as_object())
            .expect("notice object");

        assert_eq!(
            obj.get("kind").and_then(|v| v.as_str()),
            Some("label_key_synthesized")
        );
        assert_eq!(obj.get("cmd").and_then(|v| v.as_str()), Some("label-remap"));
        assert_eq!(obj.get("file").and_then(|v| v.as_str()), Some("parc.dlabel.nii"));
        let details = obj.get("details").and_then(|v| v.as_object()).expect("details");
        assert_eq!(details.get("new_key").and_then(|v| v.as_i64()), Some(1));
    }
}
