//! Scriptable in-process backend for tests and offline runs.
//!
//! Every collaborator trait is implemented on [`MockBackend`]. Responses are
//! configured up front with the builder methods; calls that mutate backend
//! state are recorded so tests can assert on them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::provider::{
    BackendError, ChunkRegistry, MemoryBackend, StaticTranslations, TranslationProvider,
};
use crate::types::{
    BrowsePage, BrowseQuery, CharacterSummary, ClearResponse, DeleteRequest, DeleteResponse,
    LanguageEntry, MemoryDocument, MemoryStatus, QueryHit, RegisterRequest, RegisterResponse,
    SortOrder, StoreRequest, StoreResponse, VariantPayload,
};

#[derive(Debug, Default)]
pub struct MockBackend {
    /// `None` makes discovery fail.
    languages: Option<Vec<LanguageEntry>>,
    variants: HashMap<String, VariantPayload>,
    variant_delays: HashMap<String, Duration>,
    static_files: HashMap<(String, String), VariantPayload>,
    /// Files that answer the existence check but fail to load.
    broken_static: Vec<(String, String)>,
    hits: Vec<QueryHit>,
    healthy: AtomicBool,
    /// Number of health checks to fail before reporting healthy.
    health_failures: AtomicUsize,
    fail_store: AtomicBool,
    fail_query: AtomicBool,
    fail_register: AtomicBool,
    stored: Mutex<Vec<StoreRequest>>,
    /// Documents as the store holds them, one per stored message.
    documents: Mutex<Vec<MemoryDocument>>,
    next_doc: AtomicUsize,
    registered: Mutex<Vec<RegisterRequest>>,
    queries: Mutex<Vec<(String, usize)>>,
    health_calls: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockBackend {
    /// A healthy backend with no data.
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn with_languages(mut self, languages: Vec<LanguageEntry>) -> Self {
        self.languages = Some(languages);
        self
    }

    pub fn with_variant(mut self, code: &str, payload: VariantPayload) -> Self {
        self.variants.insert(code.to_owned(), payload);
        self
    }

    /// Delay the load of one variant, to reorder completions.
    pub fn with_variant_delay(mut self, code: &str, delay: Duration) -> Self {
        self.variant_delays.insert(code.to_owned(), delay);
        self
    }

    pub fn with_static_file(mut self, location: &str, code: &str, payload: VariantPayload) -> Self {
        self.static_files
            .insert((location.to_owned(), code.to_owned()), payload);
        self
    }

    pub fn with_broken_static_file(mut self, location: &str, code: &str) -> Self {
        self.broken_static.push((location.to_owned(), code.to_owned()));
        self
    }

    pub fn with_hits(mut self, hits: Vec<QueryHit>) -> Self {
        self.hits = hits;
        self
    }

    pub fn with_documents(self, documents: Vec<MemoryDocument>) -> Self {
        self.next_doc.store(documents.len(), Ordering::SeqCst);
        *lock(&self.documents) = documents;
        self
    }

    pub fn with_health_failures(self, count: usize) -> Self {
        self.health_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_fail_store(&self, fail: bool) {
        self.fail_store.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_query(&self, fail: bool) {
        self.fail_query.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::SeqCst);
    }

    pub fn stored(&self) -> Vec<StoreRequest> {
        lock(&self.stored).clone()
    }

    pub fn documents(&self) -> Vec<MemoryDocument> {
        lock(&self.documents).clone()
    }

    pub fn registered(&self) -> Vec<RegisterRequest> {
        lock(&self.registered).clone()
    }

    pub fn queries(&self) -> Vec<(String, usize)> {
        lock(&self.queries).clone()
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn ensure_healthy(&self) -> Result<(), BackendError> {
        if self.is_healthy() {
            Ok(())
        } else {
            Err(BackendError::Unreachable("down".into()))
        }
    }

    /// Documents ordered by timestamp; ties keep insertion order.
    fn sorted(&self, order: SortOrder) -> Vec<MemoryDocument> {
        let mut docs = lock(&self.documents).clone();
        match order {
            SortOrder::Newest => docs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
            SortOrder::Oldest => docs.sort_by_key(|d| d.timestamp),
        }
        docs
    }
}

#[async_trait]
impl TranslationProvider for MockBackend {
    async fn discover(&self) -> Result<Vec<LanguageEntry>, BackendError> {
        self.languages
            .clone()
            .ok_or_else(|| BackendError::Unreachable("discovery disabled".into()))
    }

    async fn load_variant(&self, code: &str) -> Result<VariantPayload, BackendError> {
        if let Some(delay) = self.variant_delays.get(code) {
            tokio::time::sleep(*delay).await;
        }
        self.variants
            .get(code)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(code.to_owned()))
    }
}

#[async_trait]
impl StaticTranslations for MockBackend {
    async fn exists(&self, location: &str, code: &str) -> bool {
        let key = (location.to_owned(), code.to_owned());
        self.static_files.contains_key(&key) || self.broken_static.contains(&key)
    }

    async fn fetch(&self, location: &str, code: &str) -> Result<VariantPayload, BackendError> {
        self.static_files
            .get(&(location.to_owned(), code.to_owned()))
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("{location}/{code}.json")))
    }
}

#[async_trait]
impl MemoryBackend for MockBackend {
    async fn health(&self) -> Result<(), BackendError> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.health_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.health_failures.store(pending - 1, Ordering::SeqCst);
            return Err(BackendError::Unreachable("starting up".into()));
        }
        if self.is_healthy() {
            Ok(())
        } else {
            Err(BackendError::Unreachable("down".into()))
        }
    }

    async fn store(&self, request: &StoreRequest) -> Result<StoreResponse, BackendError> {
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(BackendError::RequestFailed("500: store failed".into()));
        }
        lock(&self.stored).push(request.clone());
        let mut documents = lock(&self.documents);
        for message in &request.messages {
            let n = self.next_doc.fetch_add(1, Ordering::SeqCst) + 1;
            documents.push(MemoryDocument {
                id: format!("doc_{n:04}"),
                text: message.content.clone(),
                character: request.character.clone(),
                role: message.role.clone(),
                name: message.name.clone(),
                auto_stored: request.auto_stored,
                timestamp: message.timestamp,
            });
        }
        Ok(StoreResponse {
            stored: request.messages.len() as u64,
            total_documents: Some(documents.len() as u64),
        })
    }

    async fn query(&self, query: &str, k: usize) -> Result<Vec<QueryHit>, BackendError> {
        lock(&self.queries).push((query.to_owned(), k));
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(BackendError::RequestFailed("500: query failed".into()));
        }
        Ok(self.hits.iter().take(k).cloned().collect())
    }

    async fn status(&self) -> Result<MemoryStatus, BackendError> {
        self.ensure_healthy()?;
        Ok(MemoryStatus {
            document_count: lock(&self.documents).len() as u64,
            total_size_mb: 0.0,
            training_ready: false,
        })
    }

    async fn browse(&self, query: &BrowseQuery) -> Result<BrowsePage, BackendError> {
        self.ensure_healthy()?;
        let docs: Vec<MemoryDocument> = self
            .sorted(query.sort_order)
            .into_iter()
            .filter(|d| query.character.as_ref().is_none_or(|c| &d.character == c))
            .collect();
        let total = docs.len();
        Ok(BrowsePage {
            documents: docs.into_iter().skip(query.offset).take(query.limit).collect(),
            total: total as u64,
            offset: query.offset,
            limit: query.limit,
            has_more: query.offset + query.limit < total,
        })
    }

    async fn delete(&self, request: &DeleteRequest) -> Result<DeleteResponse, BackendError> {
        self.ensure_healthy()?;
        let mut documents = lock(&self.documents);
        let before = documents.len();
        documents.retain(|d| !request.matches(d));
        Ok(DeleteResponse {
            deleted: (before - documents.len()) as u64,
            remaining_documents: Some(documents.len() as u64),
        })
    }

    async fn clear_all(&self) -> Result<ClearResponse, BackendError> {
        self.ensure_healthy()?;
        let mut documents = lock(&self.documents);
        let deleted = documents.len() as u64;
        documents.clear();
        Ok(ClearResponse { deleted })
    }

    async fn characters(&self) -> Result<Vec<CharacterSummary>, BackendError> {
        self.ensure_healthy()?;
        let mut summaries: Vec<CharacterSummary> = Vec::new();
        for doc in lock(&self.documents).iter() {
            let idx = match summaries.iter().position(|s| s.name == doc.character) {
                Some(idx) => idx,
                None => {
                    summaries.push(CharacterSummary {
                        name: doc.character.clone(),
                        oldest_timestamp: doc.timestamp,
                        newest_timestamp: doc.timestamp,
                        ..CharacterSummary::default()
                    });
                    summaries.len() - 1
                }
            };
            let s = &mut summaries[idx];
            s.total += 1;
            if doc.auto_stored {
                s.auto_stored += 1;
            } else {
                s.manual += 1;
            }
            s.oldest_timestamp = s.oldest_timestamp.min(doc.timestamp);
            s.newest_timestamp = s.newest_timestamp.max(doc.timestamp);
        }
        summaries.sort_by(|a, b| b.total.cmp(&a.total));
        Ok(summaries)
    }

    async fn history(&self, limit: usize) -> Result<Vec<MemoryDocument>, BackendError> {
        self.ensure_healthy()?;
        Ok(self.sorted(SortOrder::Newest).into_iter().take(limit).collect())
    }
}

#[async_trait]
impl ChunkRegistry for MockBackend {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, BackendError> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(BackendError::RequestFailed("500: registry failed".into()));
        }
        let mut registered = lock(&self.registered);
        registered.push(request.clone());
        Ok(RegisterResponse {
            chunk_id: Some(format!("chunk_{:04}", registered.len())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discovery_fails_without_languages() {
        let mock = MockBackend::new();
        assert!(mock.discover().await.is_err());

        let mock = MockBackend::new().with_languages(vec![LanguageEntry::new("en")]);
        assert_eq!(mock.discover().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn health_failures_count_down() {
        let mock = MockBackend::new().with_health_failures(2);
        assert!(mock.health().await.is_err());
        assert!(mock.health().await.is_err());
        assert!(mock.health().await.is_ok());
        assert_eq!(mock.health_calls(), 3);
    }

    #[tokio::test]
    async fn query_respects_k_and_records() {
        let mock = MockBackend::new().with_hits(vec![
            QueryHit::new("a", 0.9),
            QueryHit::new("b", 0.8),
            QueryHit::new("c", 0.7),
        ]);
        let hits = mock.query("dogs", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(mock.queries(), vec![("dogs".to_owned(), 2)]);
    }

    #[tokio::test]
    async fn broken_static_file_exists_but_fails_fetch() {
        let mock = MockBackend::new().with_broken_static_file("loc", "de");
        assert!(mock.exists("loc", "de").await);
        assert!(mock.fetch("loc", "de").await.is_err());
    }

    fn store_request(character: &str, auto_stored: bool, stamps: &[i64]) -> StoreRequest {
        StoreRequest {
            character: character.into(),
            messages: stamps
                .iter()
                .map(|&timestamp| crate::types::StoredMessage {
                    role: "user".into(),
                    name: "Ana".into(),
                    content: format!("message at {timestamp}"),
                    timestamp,
                    images: Vec::new(),
                })
                .collect(),
            auto_stored,
        }
    }

    #[tokio::test]
    async fn stored_messages_become_browsable_documents() {
        let mock = MockBackend::new();
        mock.store(&store_request("Keeper", true, &[10, 30])).await.unwrap();
        mock.store(&store_request("Sailor", false, &[20])).await.unwrap();

        let page = mock
            .browse(&BrowseQuery {
                limit: 2,
                ..BrowseQuery::default()
            })
            .await
            .unwrap();
        let stamps: Vec<i64> = page.documents.iter().map(|d| d.timestamp).collect();
        assert_eq!(stamps, vec![30, 20]);
        assert_eq!(page.total, 3);
        assert!(page.has_more);

        let keeper = mock
            .browse(&BrowseQuery {
                character: Some("Keeper".into()),
                sort_order: SortOrder::Oldest,
                ..BrowseQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(keeper.documents[0].timestamp, 10);
        assert_eq!(keeper.total, 2);
    }

    #[tokio::test]
    async fn delete_and_clear_update_counts() {
        let mock = MockBackend::new();
        mock.store(&store_request("Keeper", true, &[10, 30])).await.unwrap();
        mock.store(&store_request("Keeper", false, &[20])).await.unwrap();

        let summary = &mock.characters().await.unwrap()[0];
        assert_eq!((summary.total, summary.auto_stored, summary.manual), (3, 2, 1));
        assert_eq!((summary.oldest_timestamp, summary.newest_timestamp), (10, 30));

        let resp = mock
            .delete(&DeleteRequest::character("Keeper").before(25).auto_stored_only())
            .await
            .unwrap();
        assert_eq!(resp.deleted, 1);
        assert_eq!(resp.remaining_documents, Some(2));
        assert_eq!(mock.delete(&DeleteRequest::default()).await.unwrap().deleted, 0);

        assert_eq!(mock.history(1).await.unwrap()[0].timestamp, 30);
        assert_eq!(mock.clear_all().await.unwrap().deleted, 2);
        assert_eq!(mock.status().await.unwrap().document_count, 0);
    }
}
