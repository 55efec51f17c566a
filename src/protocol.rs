//! Host-facing message shapes.
//!
//! Every message is a JSON object discriminated by its `type` field. On the
//! wire each message occupies exactly one line.

use crate::config::SettingsPatch;
use serde::{Deserialize, Serialize};

/// Messages the host sends to the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    /// Merge settings and load the interpreter
    Init {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        settings: Option<SettingsPatch>,
    },
    /// Execute Python source in the current session
    Run { code: String },
}

/// Kind of a captured output event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Standard output text
    Text,
    /// Standard error text
    Error,
    /// Base64-encoded PNG
    Image,
}

/// One unit of captured output, immutable once emitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEvent {
    pub kind: OutputKind,
    pub content: String,
}

impl OutputEvent {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Text,
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Error,
            content: content.into(),
        }
    }

    pub fn image(content: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Image,
            content: content.into(),
        }
    }
}

/// Messages the worker sends to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// Interpreter loaded and configured
    Ready,
    /// Captured output from the running code
    Output(OutputEvent),
    /// Run finished without an uncaught failure
    Done,
    /// Initialization or run failed
    Error { error: String },
}

impl OutboundMessage {
    pub fn error(message: impl Into<String>) -> Self {
        OutboundMessage::Error {
            error: message.into(),
        }
    }
}
