use async_trait::async_trait;

use crate::types::{
    BrowsePage, BrowseQuery, CharacterSummary, ClearResponse, DeleteRequest, DeleteResponse,
    LanguageEntry, MemoryDocument, MemoryStatus, QueryHit, RegisterRequest, RegisterResponse,
    StoreRequest, StoreResponse, VariantPayload,
};

/// Error type for backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// The backend answered 503: the module behind the route is switched off.
    #[error("module disabled: {0}")]
    ModuleDisabled(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("invalid response: {0}")]
    Decode(String),
}

impl BackendError {
    /// True when the failure says the backend as a whole cannot serve requests,
    /// as opposed to one request being wrong.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::ModuleDisabled(_))
    }
}

/// Translation discovery and loading served by the backend.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// List the variants the backend can serve.
    async fn discover(&self) -> Result<Vec<LanguageEntry>, BackendError>;

    /// Load the full string table of one variant.
    async fn load_variant(&self, code: &str) -> Result<VariantPayload, BackendError>;
}

/// Translation files published at static locations (no listing available).
#[async_trait]
pub trait StaticTranslations: Send + Sync {
    /// Lightweight existence check for `{location}/{code}.json`.
    async fn exists(&self, location: &str, code: &str) -> bool;

    async fn fetch(&self, location: &str, code: &str) -> Result<VariantPayload, BackendError>;
}

/// Semantic memory store: persistence and similarity retrieval.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    async fn health(&self) -> Result<(), BackendError>;

    async fn store(&self, request: &StoreRequest) -> Result<StoreResponse, BackendError>;

    /// Top-`k` candidates in the service's ranking order.
    async fn query(&self, query: &str, k: usize) -> Result<Vec<QueryHit>, BackendError>;

    async fn status(&self) -> Result<MemoryStatus, BackendError>;

    async fn browse(&self, query: &BrowseQuery) -> Result<BrowsePage, BackendError>;

    async fn delete(&self, request: &DeleteRequest) -> Result<DeleteResponse, BackendError>;

    /// Drop every stored document.
    async fn clear_all(&self) -> Result<ClearResponse, BackendError>;

    /// Characters with stored documents, most documents first.
    async fn characters(&self) -> Result<Vec<CharacterSummary>, BackendError>;

    /// The newest `limit` documents, newest first.
    async fn history(&self, limit: usize) -> Result<Vec<MemoryDocument>, BackendError>;
}

/// Advisory registration of persisted documents as trackable units.
#[async_trait]
pub trait ChunkRegistry: Send + Sync {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_classification() {
        assert!(BackendError::Unreachable("refused".into()).is_unavailable());
        assert!(BackendError::ModuleDisabled("memory".into()).is_unavailable());
        assert!(!BackendError::NotFound("fr".into()).is_unavailable());
        assert!(!BackendError::Decode("eof".into()).is_unavailable());
    }

    #[test]
    fn error_display() {
        let e = BackendError::RequestFailed("500 Internal Server Error: boom".into());
        assert_eq!(e.to_string(), "request failed: 500 Internal Server Error: boom");
    }
}
