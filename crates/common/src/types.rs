// Contract types shared between the engine, the relay, and client collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A local edit pushed by the document content accessor, in visible
/// character positions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EditOp {
    Insert { index: usize, text: String },
    Delete { index: usize, len: usize },
    Replace { index: usize, len: usize, text: String },
}

/// A visible change produced by merging remote operations. Changes in one
/// batch apply in order, each against the text left by the previous one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TextChange {
    Insert { index: usize, text: String },
    Delete { index: usize, len: usize },
}

impl TextChange {
    /// Apply to a plain string, treating indices as character offsets.
    /// Out-of-range changes are clamped to the string bounds.
    pub fn apply_to(&self, text: &mut String) {
        match self {
            Self::Insert { index, text: inserted } => {
                let at = byte_offset(text, *index);
                text.insert_str(at, inserted);
            }
            Self::Delete { index, len } => {
                let start = byte_offset(text, *index);
                let end = byte_offset(text, index.saturating_add(*len));
                text.replace_range(start..end, "");
            }
        }
    }
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices().nth(chars).map_or(text.len(), |(offset, _)| offset)
}

/// A named saved source file held by a file store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeFile {
    pub id: Uuid,
    pub name: String,
    pub language: String,
    pub content: String,
    pub created: DateTime<Utc>,
}

impl CodeFile {
    pub fn new(name: impl Into<String>, language: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            language: language.into(),
            content: content.into(),
            created: Utc::now(),
        }
    }
}

/// Input to the remote code execution service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub language: String,
    pub source: String,
}

/// How the executed program ended.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
    /// Set when the program was killed, e.g. `SIGKILL`.
    pub signal: Option<String>,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0) && self.signal.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit: ExitStatus,
}
