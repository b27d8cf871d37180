//! The two result shapes every tool returns.
//!
//! Ok:    `{"content":[{"type":"text","text":"..."}]}`
//! Error: `{"isError":true,"content":[{"type":"text","text":"..."}]}`
//!
//! Both are surfaced verbatim as the JSON-RPC `result` of `tools/call`.
//! Tool failures never become transport-level errors; those are reserved
//! for malformed JSON and unknown methods.

use serde::{Deserialize, Serialize};

/// One content block. Only text blocks exist in this server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

/// Envelope returned by every skill handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(
        rename = "isError",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub is_error: bool,
    pub content: Vec<ContentBlock>,
}

impl ToolResult {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// The concatenated text of all content blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({
                "isError": true,
                "content": [{"type": "text", "text": "internal serialization failure"}],
            })
        })
    }
}

impl From<crate::error::AppError> for ToolResult {
    fn from(err: crate::error::AppError) -> Self {
        ToolResult::error(err.to_string())
    }
}
