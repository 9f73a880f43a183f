use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::provider::BackendError;

// ── Translation types ──

/// One language advertised by the discovery endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageEntry {
    pub code: String,
    /// English name of the language. Older backends call this `language`.
    #[serde(default, alias = "language", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_name: Option<String>,
}

impl LanguageEntry {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: None,
            native_name: None,
        }
    }

    pub fn named(
        code: impl Into<String>,
        name: impl Into<String>,
        native: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            name: Some(name.into()),
            native_name: Some(native.into()),
        }
    }
}

/// Discovery response: either the full listing object or a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DiscoveryResponse {
    Listing {
        #[serde(default)]
        available_languages: Vec<LanguageEntry>,
    },
    Bare(Vec<LanguageEntry>),
}

impl DiscoveryResponse {
    /// Flatten into entries, dropping the template pseudo-language.
    pub fn into_entries(self) -> Vec<LanguageEntry> {
        let entries = match self {
            Self::Listing { available_languages } => available_languages,
            Self::Bare(entries) => entries,
        };
        entries
            .into_iter()
            .filter(|e| e.code != "template" && !e.code.trim().is_empty())
            .collect()
    }
}

/// Display metadata shipped alongside a translation file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantMeta {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub native_name: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// The string table of one variant plus its optional metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantPayload {
    pub translations: BTreeMap<String, String>,
    pub meta: Option<VariantMeta>,
}

impl VariantPayload {
    pub fn new(translations: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            translations: translations.into_iter().collect(),
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: VariantMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Parse either the wrapped `{translations, meta}` shape served by the
    /// backend route, or a raw translation file `{...keys, _meta}`.
    /// Non-string values are skipped.
    pub fn from_value(value: serde_json::Value) -> Result<Self, BackendError> {
        let serde_json::Value::Object(mut obj) = value else {
            return Err(BackendError::Decode("translation payload is not an object".into()));
        };

        let wrapped = matches!(obj.get("translations"), Some(serde_json::Value::Object(_)));
        let (table, meta) = if wrapped {
            let meta = obj.remove("meta");
            let Some(serde_json::Value::Object(table)) = obj.remove("translations") else {
                return Err(BackendError::Decode("translations is not an object".into()));
            };
            (table, meta)
        } else {
            let meta = obj.remove("_meta");
            (obj, meta)
        };

        let meta = match meta {
            Some(serde_json::Value::Null) | None => None,
            Some(v) => serde_json::from_value(v).ok(),
        };

        let translations = table
            .into_iter()
            .filter_map(|(k, v)| match v {
                serde_json::Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect();

        Ok(Self { translations, meta })
    }
}

/// Only alphanumerics, `-` and `_` may appear in a variant code used in a path.
pub fn sanitize_code(code: &str) -> Option<&str> {
    let ok = !code.is_empty()
        && !code.contains("..")
        && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    ok.then_some(code)
}

// ── Memory types ──

/// One chat message as the memory store receives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: String,
    pub name: String,
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRequest {
    pub character: String,
    pub messages: Vec<StoredMessage>,
    pub auto_stored: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreResponse {
    #[serde(default)]
    pub stored: u64,
    #[serde(default)]
    pub total_documents: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct QueryRequest<'a> {
    pub query: &'a str,
    pub k: usize,
    pub min_score: f32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QueryResponse {
    #[serde(default)]
    pub results: Vec<QueryHit>,
}

/// A single retrieval result, ranked by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHit {
    pub text: String,
    #[serde(default)]
    pub score: f32,
}

impl QueryHit {
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            score,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStatus {
    #[serde(default)]
    pub document_count: u64,
    #[serde(default)]
    pub total_size_mb: f64,
    #[serde(default)]
    pub training_ready: bool,
}

// ── Memory management types ──

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::Oldest => "oldest",
        }
    }
}

/// One page of stored documents, optionally for a single character.
/// Sent as URL query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrowseQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
    pub offset: usize,
    pub limit: usize,
    pub sort_order: SortOrder,
}

impl Default for BrowseQuery {
    fn default() -> Self {
        Self {
            character: None,
            offset: 0,
            limit: 50,
            sort_order: SortOrder::Newest,
        }
    }
}

/// A stored document as listed by browse and history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDocument {
    pub id: String,
    /// History lists the body as `full_text`.
    #[serde(alias = "full_text")]
    pub text: String,
    #[serde(default)]
    pub character: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub auto_stored: bool,
    /// Milliseconds since the Unix epoch; 0 when unknown.
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowsePage {
    #[serde(default)]
    pub documents: Vec<MemoryDocument>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub has_more: bool,
}

/// Deletion criteria. Explicit ids take precedence; otherwise the filters
/// combine with AND. A request with neither deletes nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub doc_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_timestamp: Option<i64>,
    #[serde(default)]
    pub auto_stored_only: bool,
}

impl DeleteRequest {
    pub fn ids(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            doc_ids: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn character(name: impl Into<String>) -> Self {
        Self {
            character: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn before(mut self, timestamp_ms: i64) -> Self {
        self.before_timestamp = Some(timestamp_ms);
        self
    }

    pub fn auto_stored_only(mut self) -> Self {
        self.auto_stored_only = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
            && self.character.is_none()
            && self.before_timestamp.is_none()
            && !self.auto_stored_only
    }

    /// Whether a filter-based request selects `doc`. Ids are matched separately.
    pub fn matches(&self, doc: &MemoryDocument) -> bool {
        if !self.doc_ids.is_empty() {
            return self.doc_ids.contains(&doc.id);
        }
        if self.is_empty() {
            return false;
        }
        self.character.as_ref().is_none_or(|c| &doc.character == c)
            && self.before_timestamp.is_none_or(|ts| doc.timestamp < ts)
            && (!self.auto_stored_only || doc.auto_stored)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    #[serde(default)]
    pub deleted: u64,
    #[serde(default)]
    pub remaining_documents: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClearResponse {
    #[serde(default)]
    pub deleted: u64,
}

/// Per-character document counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterSummary {
    pub name: String,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub auto_stored: u64,
    #[serde(default)]
    pub manual: u64,
    #[serde(default)]
    pub oldest_timestamp: i64,
    #[serde(default)]
    pub newest_timestamp: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CharactersResponse {
    #[serde(default)]
    pub characters: Vec<CharacterSummary>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryResponse {
    #[serde(default)]
    pub history: Vec<MemoryDocument>,
}

// ── Chunk registry types ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredDocument {
    pub id: String,
    pub text: String,
    pub role: String,
    pub name: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub documents: Vec<RegisteredDocument>,
    pub character: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub chunk_id: Option<String>,
}
