//! HTTP implementation of the backend collaborators.
//!
//! Speaks the plugin backend's JSON API: `/i18n` for translations,
//! `/memory/*` for the semantic store, `/chunks/create` for registration and
//! `/health` for availability probing. Static translation locations are plain
//! file servers addressed by absolute URL.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::provider::{
    BackendError, ChunkRegistry, MemoryBackend, StaticTranslations, TranslationProvider,
};
use crate::types::{
    BrowsePage, BrowseQuery, CharacterSummary, CharactersResponse, ClearResponse, DeleteRequest,
    DeleteResponse, DiscoveryResponse, HistoryResponse, LanguageEntry, MemoryDocument,
    MemoryStatus, QueryHit, QueryRequest, QueryResponse, RegisterRequest, RegisterResponse,
    StoreRequest, StoreResponse, VariantPayload, sanitize_code,
};

/// HTTP client for the plugin backend.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Build with a per-request timeout, so a hung backend surfaces as an error.
    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::RequestFailed(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base: String = base_url.into();
        Self {
            client,
            base_url: base.trim_end_matches('/').to_owned(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, BackendError> {
        let resp = self.client.get(&url).send().await.map_err(transport_error)?;
        decode(resp).await
    }

    async fn get_json_with<Q: serde::Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: String,
        query: &Q,
    ) -> Result<T, BackendError> {
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;
        decode(resp).await
    }

    async fn post_json<B: serde::Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: String,
        body: &B,
    ) -> Result<T, BackendError> {
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        decode(resp).await
    }
}

fn static_file_url(location: &str, code: &str) -> String {
    format!("{}/{}.json", location.trim_end_matches('/'), code)
}

fn transport_error(e: reqwest::Error) -> BackendError {
    if e.is_connect() || e.is_timeout() {
        BackendError::Unreachable(e.to_string())
    } else {
        BackendError::RequestFailed(e.to_string())
    }
}

/// Map a non-success status to the error taxonomy.
fn check_error(status: reqwest::StatusCode, body: String) -> BackendError {
    match status.as_u16() {
        404 => BackendError::NotFound(body),
        503 => BackendError::ModuleDisabled(body),
        _ => BackendError::RequestFailed(format!("{status}: {body}")),
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, BackendError> {
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(check_error(status, text));
    }
    resp.json().await.map_err(|e| BackendError::Decode(e.to_string()))
}

#[async_trait]
impl TranslationProvider for HttpBackend {
    async fn discover(&self) -> Result<Vec<LanguageEntry>, BackendError> {
        let listing: DiscoveryResponse = self.get_json(self.endpoint("i18n")).await?;
        Ok(listing.into_entries())
    }

    async fn load_variant(&self, code: &str) -> Result<VariantPayload, BackendError> {
        let code = sanitize_code(code).ok_or_else(|| BackendError::NotFound(code.to_owned()))?;
        let value: serde_json::Value = self.get_json(self.endpoint(&format!("i18n/{code}"))).await?;
        VariantPayload::from_value(value)
    }
}

#[async_trait]
impl StaticTranslations for HttpBackend {
    async fn exists(&self, location: &str, code: &str) -> bool {
        let Some(code) = sanitize_code(code) else {
            return false;
        };
        match self.client.head(static_file_url(location, code)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::trace!(location, code, error = %e, "static existence check failed");
                false
            }
        }
    }

    async fn fetch(&self, location: &str, code: &str) -> Result<VariantPayload, BackendError> {
        let code = sanitize_code(code).ok_or_else(|| BackendError::NotFound(code.to_owned()))?;
        let value: serde_json::Value = self.get_json(static_file_url(location, code)).await?;
        VariantPayload::from_value(value)
    }
}

#[async_trait]
impl MemoryBackend for HttpBackend {
    async fn health(&self) -> Result<(), BackendError> {
        let resp = self
            .client
            .get(self.endpoint("health"))
            .send()
            .await
            .map_err(transport_error)?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Unreachable(format!("health returned {}", resp.status())))
        }
    }

    async fn store(&self, request: &StoreRequest) -> Result<StoreResponse, BackendError> {
        self.post_json(self.endpoint("memory/store"), request).await
    }

    async fn query(&self, query: &str, k: usize) -> Result<Vec<QueryHit>, BackendError> {
        // Relevance filtering happens client-side against the live threshold.
        let body = QueryRequest { query, k, min_score: 0.0 };
        let resp: QueryResponse = self.post_json(self.endpoint("memory/query"), &body).await?;
        Ok(resp.results)
    }

    async fn status(&self) -> Result<MemoryStatus, BackendError> {
        self.get_json(self.endpoint("memory/status")).await
    }

    async fn browse(&self, query: &BrowseQuery) -> Result<BrowsePage, BackendError> {
        self.get_json_with(self.endpoint("memory/browse"), query).await
    }

    async fn delete(&self, request: &DeleteRequest) -> Result<DeleteResponse, BackendError> {
        self.post_json(self.endpoint("memory/delete"), request).await
    }

    async fn clear_all(&self) -> Result<ClearResponse, BackendError> {
        self.post_json(self.endpoint("memory/clear-all"), &serde_json::json!({})).await
    }

    async fn characters(&self) -> Result<Vec<CharacterSummary>, BackendError> {
        let resp: CharactersResponse = self.get_json(self.endpoint("memory/characters")).await?;
        Ok(resp.characters)
    }

    async fn history(&self, limit: usize) -> Result<Vec<MemoryDocument>, BackendError> {
        let resp: HistoryResponse = self
            .get_json_with(self.endpoint("memory/history"), &[("limit", limit)])
            .await?;
        Ok(resp.history)
    }
}

#[async_trait]
impl ChunkRegistry for HttpBackend {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, BackendError> {
        self.post_json(self.endpoint("chunks/create"), request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_paths() {
        let b = HttpBackend::new("http://127.0.0.1:5050/");
        assert_eq!(b.base_url(), "http://127.0.0.1:5050");
        assert_eq!(b.endpoint("i18n"), "http://127.0.0.1:5050/i18n");
        assert_eq!(b.endpoint("/memory/query"), "http://127.0.0.1:5050/memory/query");
    }

    #[test]
    fn static_url_layout() {
        assert_eq!(
            static_file_url("https://cdn.example.com/i18n/", "ko"),
            "https://cdn.example.com/i18n/ko.json"
        );
    }

    #[test]
    fn status_mapping() {
        let not_found = check_error(reqwest::StatusCode::NOT_FOUND, "missing".into());
        assert!(matches!(not_found, BackendError::NotFound(_)));

        let disabled = check_error(reqwest::StatusCode::SERVICE_UNAVAILABLE, "off".into());
        assert!(disabled.is_unavailable());

        let other = check_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "boom".into());
        assert!(matches!(other, BackendError::RequestFailed(ref m) if m.contains("boom")));
    }

    #[tokio::test]
    async fn invalid_code_never_hits_network() {
        let b = HttpBackend::new("http://127.0.0.1:9");
        let err = b.load_variant("../secrets").await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)));
        assert!(!b.exists("http://127.0.0.1:9", "a/b").await);
    }
}
