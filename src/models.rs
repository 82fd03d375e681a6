use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Caption input from API
///
/// Every field is optional on the wire. A body that fails to parse is
/// treated the same as one with no text.
#[derive(Debug, Default)]
pub struct CaptionInput {
    pub text: String,
    pub ts: Option<Value>,
    pub url: Option<Value>,
}

impl CaptionInput {
    /// Only a JSON object with a string `text` yields text.
    /// `ts` and `url` are passed through whatever their shape.
    pub fn from_body(body: &[u8]) -> Self {
        let Ok(Value::Object(mut fields)) = serde_json::from_slice::<Value>(body) else {
            return Self::default();
        };

        Self {
            text: fields
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            ts: fields.remove("ts"),
            url: fields.remove("url"),
        }
    }
}


/// A single received caption (trimmed, never empty)
#[derive(Debug, Clone)]
pub struct CaptionEvent {
    pub id: Uuid,
    pub text: String,
    pub received_at: DateTime<Local>,
}

impl CaptionEvent {
    /// Returns `None` when nothing is left after trimming.
    pub fn new(raw: &str) -> Option<Self> {
        let text = raw.trim();
        if text.is_empty() {
            return None;
        }

        Some(Self {
            id: Uuid::new_v4(),
            text: text.to_string(),
            received_at: Local::now(),
        })
    }

    /// `YYYY-MM-DD HH:MM:SS` in local time
    pub fn timestamp(&self) -> String {
        self.received_at.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    pub fn log_line(&self) -> String {
        format!("[{}] {}", self.timestamp(), self.text)
    }

    pub fn code_line(&self, code: &str) -> String {
        format!("[CODE] {} {}", self.timestamp(), code)
    }
}

/// What the classifier found in a caption
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionResult {
    pub matched_keyword: Option<String>,
    pub matched_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Keyword,
    Code,
}

/// Outbound alert, built once per detection and dropped after sending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub kind: AlertKind,
    /// The matched keyword or code
    pub subject: String,
    pub rendered_text: String,
}

impl AlertMessage {
    pub fn keyword(keyword: &str, text: &str) -> Self {
        Self {
            kind: AlertKind::Keyword,
            subject: keyword.to_string(),
            rendered_text: format!("⚠️ Attendance Hint Detected: '{keyword}'\n{text}"),
        }
    }

    pub fn code(code: &str) -> Self {
        Self {
            kind: AlertKind::Code,
            subject: code.to_string(),
            rendered_text: format!("🔢 Attendance Code Detected: {code}"),
        }
    }
}

/// API Response
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }

    pub fn empty() -> Self {
        Self {
            status: "empty".to_string(),
        }
    }
}
