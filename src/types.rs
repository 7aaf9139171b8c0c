//! Shared types used across the palisade pipeline.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Conversation identifier as handed to us by the chat transport.
pub type ConversationId = i64;

// ---------------------------------------------------------------------------
// Chat messages
// ---------------------------------------------------------------------------

/// A single entry in a conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Result of one lexical detection pass over a message.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Detection {
    pub is_suspicious: bool,
    /// Weighted sum of matched rules (regex hits weigh 1, phrase hits 2).
    pub score: u32,
    pub regex_hits: Vec<String>,
    pub phrase_hits: Vec<String>,
}

impl Detection {
    /// The strongest matched signal, for audit logging.
    pub fn top_signal(&self) -> Option<&str> {
        self.phrase_hits
            .first()
            .or_else(|| self.regex_hits.first())
            .map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Moderation
// ---------------------------------------------------------------------------

/// Binary verdict from the LLM moderator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationVerdict {
    Allow,
    Block,
}

impl ModerationVerdict {
    pub fn is_block(self) -> bool {
        self == Self::Block
    }
}

/// Reported by the `moderation_status` admin operation.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModerationStatus {
    pub enabled: bool,
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// A short-lived bearer credential for outbound service calls.
///
/// Owned by the credential cache; consumers receive clones and must not
/// persist them past a single call sequence.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// True once the credential is within `margin` of its nominal expiry.
    pub fn expires_within(&self, margin: Duration) -> bool {
        Utc::now() + margin >= self.expires_at
    }
}
