use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Resolution types ──────────────────────────────────────────

/// Key → string table for one variant. Partial by design.
pub type ResourceSet = HashMap<String, String>;

/// One selectable language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceVariant {
    pub code: String,
    pub display_name: String,
    pub native_name: String,
}

impl ResourceVariant {
    /// A variant known only by its code.
    pub fn bare(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            display_name: code.clone(),
            native_name: code.clone(),
            code,
        }
    }
}

/// How much of the default key space the active variant covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub total: usize,
    pub resolved: usize,
    pub missing_keys: Vec<String>,
}

impl Coverage {
    /// Every key counts as resolved.
    pub fn complete(total: usize) -> Self {
        Self {
            total,
            resolved: total,
            missing_keys: Vec::new(),
        }
    }

    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            return 100.0;
        }
        self.resolved as f32 * 100.0 / self.total as f32
    }
}

/// Snapshot of one fully materialized variant switch. Never partially updated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveResolutionState {
    pub active_variant: String,
    /// Persisted user override; empty when following the environment hint.
    pub override_variant: String,
    pub default_set: ResourceSet,
    pub active_set: ResourceSet,
    pub coverage: Coverage,
    /// Sequence number of the switch that produced this state.
    pub sequence: u64,
}

// ── Chat types ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// A message node on the host timeline. Read-only to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub id: String,
    pub role: Role,
    pub display_name: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatEvent {
    pub fn user(id: impl Into<String>, name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, Role::User, name, text)
    }

    pub fn assistant(
        id: impl Into<String>,
        name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(id, Role::Assistant, name, text)
    }

    pub fn new(
        id: impl Into<String>,
        role: Role,
        name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            display_name: name.into(),
            text: text.into(),
            attachments: Vec::new(),
            is_system: role == Role::System,
            created_at: Utc::now(),
        }
    }

    /// Authored by the human, not injected by the host.
    pub fn is_user_authored(&self) -> bool {
        self.role == Role::User && !self.is_system
    }
}

/// Request being composed for the generation backend, before it leaves the client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingRequest {
    /// Out-of-band instructions; never shown as dialogue.
    pub system_prompt: String,
    pub messages: Vec<ChatEvent>,
}

impl OutgoingRequest {
    pub fn new(system_prompt: impl Into<String>, messages: Vec<ChatEvent>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages,
        }
    }

    /// Text of the newest user-authored message, if any.
    pub fn latest_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_user_authored() && !m.text.trim().is_empty())
            .map(|m| m.text.as_str())
    }

    pub fn append_system(&mut self, block: &str) {
        if !self.system_prompt.is_empty() {
            self.system_prompt.push_str("\n\n");
        }
        self.system_prompt.push_str(block);
    }
}

// ── Retrieval types ───────────────────────────────────────────

/// One retrieval result as returned by the memory service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub text: String,
    pub score: f32,
}

impl From<mnemo_backend::types::QueryHit> for RetrievalCandidate {
    fn from(hit: mnemo_backend::types::QueryHit) -> Self {
        Self {
            text: hit.text,
            score: hit.score,
        }
    }
}
