use std::sync::{Arc, PoisonError};
use std::time::Duration;

use mnemo_backend::types::{
    BrowsePage, BrowseQuery, CharacterSummary, DeleteRequest, DeleteResponse, MemoryDocument,
    MemoryStatus, StoreRequest, StoredMessage,
};
use mnemo_backend::{ChunkRegistry, MemoryBackend, StaticTranslations, TranslationProvider};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SharedCfg;
use crate::error::MnemoError;
use crate::i18n::ResourceResolver;
use crate::io::timeline::{FeedReceiver, Timeline};
use crate::memory::ingest::SeenOutcome;
use crate::memory::inject::InjectionOutcome;
use crate::memory::{
    Availability, EventDeduplicator, IngestionPipeline, RetrievalInjector, SharedDedup,
};
use crate::settings::SettingsStore;
use crate::types::{ActiveResolutionState, ChatEvent, OutgoingRequest, RetrievalCandidate};

/// The four collaborators a session talks to. Usually one HTTP client behind all of them.
#[derive(Clone)]
pub struct Backends {
    pub translations: Arc<dyn TranslationProvider>,
    pub statics: Arc<dyn StaticTranslations>,
    pub memory: Arc<dyn MemoryBackend>,
    pub registry: Arc<dyn ChunkRegistry>,
}

impl Backends {
    pub fn shared<B>(backend: Arc<B>) -> Self
    where
        B: TranslationProvider + StaticTranslations + MemoryBackend + ChunkRegistry + 'static,
    {
        Self {
            translations: backend.clone(),
            statics: backend.clone(),
            memory: backend.clone(),
            registry: backend,
        }
    }
}

/// Owns the resolver and the memory pipelines for one run of the host.
pub struct Session {
    id: Uuid,
    cfg: SharedCfg,
    resolver: Arc<ResourceResolver>,
    dedup: SharedDedup,
    availability: Availability,
    ingestion: IngestionPipeline,
    injector: RetrievalInjector,
    memory: Arc<dyn MemoryBackend>,
    timeline: Arc<dyn Timeline>,
    shutdown: CancellationToken,
}

impl Session {
    pub fn new(
        cfg: SharedCfg,
        backends: Backends,
        settings: Arc<dyn SettingsStore>,
        timeline: Arc<dyn Timeline>,
        hint: Option<String>,
    ) -> Self {
        let id = Uuid::new_v4();
        let shutdown = CancellationToken::new();
        let snapshot = cfg.snapshot();
        let resolver = Arc::new(ResourceResolver::new(
            backends.translations,
            backends.statics,
            settings,
            &snapshot,
            hint,
        ));
        let dedup = EventDeduplicator::shared(snapshot.dedup_ceiling, snapshot.min_content_chars);
        let availability = Availability::default();
        let ingestion = IngestionPipeline::new(
            cfg.clone(),
            dedup.clone(),
            availability.clone(),
            backends.memory.clone(),
            backends.registry,
            timeline.clone(),
        )
        .with_session(id)
        .with_shutdown(shutdown.clone());
        let injector =
            RetrievalInjector::new(cfg.clone(), availability.clone(), backends.memory.clone());
        Self {
            id,
            cfg,
            resolver,
            dedup,
            availability,
            ingestion,
            injector,
            memory: backends.memory,
            timeline,
            shutdown,
        }
    }

    /// Check the backend and resolve the startup language concurrently, then
    /// start the periodic health recheck.
    pub async fn start(&self) -> Arc<ActiveResolutionState> {
        let (retries, backoff, recheck) = self.cfg.read(|c| {
            (
                c.health_retries,
                Duration::from_millis(c.health_backoff_ms),
                Duration::from_secs(c.health_recheck_secs),
            )
        });
        let (up, state) = tokio::join!(
            self.availability.check_health(self.memory.as_ref(), retries, backoff),
            self.resolver.initialize(),
        );
        tracing::info!(
            session = %self.id,
            backend = up,
            language = %state.active_variant,
            "session started"
        );
        if !recheck.is_zero() {
            self.availability
                .spawn_recheck(self.memory.clone(), recheck, self.shutdown.child_token());
        }
        state
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cfg(&self) -> &SharedCfg {
        &self.cfg
    }

    pub fn resolver(&self) -> &ResourceResolver {
        &self.resolver
    }

    pub fn availability(&self) -> &Availability {
        &self.availability
    }

    pub fn ingestion(&self) -> &IngestionPipeline {
        &self.ingestion
    }

    pub fn injector(&self) -> &RetrievalInjector {
        &self.injector
    }

    pub async fn switch_language(&self, code: &str) -> Arc<ActiveResolutionState> {
        self.resolver.switch_to(code).await
    }

    /// Hand a newly rendered event to ingestion.
    pub fn observe(&self, event: &ChatEvent) -> SeenOutcome {
        self.ingestion.on_seen(event)
    }

    /// Consume a feed channel in the background until shutdown.
    pub fn spawn_ingestion(&self, feed: FeedReceiver) -> JoinHandle<()> {
        tokio::spawn(self.ingestion.clone().run(feed, self.shutdown.child_token()))
    }

    /// Last step before a request leaves the client.
    pub async fn prepare_request(&self, request: &mut OutgoingRequest) -> InjectionOutcome {
        self.injector.inject(request).await
    }

    /// Search memory on the user's behalf. Unlike injection, errors are returned.
    pub async fn query_memory(&self, query: &str) -> Result<Vec<RetrievalCandidate>, MnemoError> {
        let k = self.cfg.read(|c| c.retrieval_k);
        let hits = self
            .memory
            .query(query, k)
            .await
            .inspect_err(|e| self.availability.note_failure(e))?;
        Ok(hits.into_iter().map(RetrievalCandidate::from).collect())
    }

    pub async fn memory_status(&self) -> Result<MemoryStatus, MnemoError> {
        let status = self
            .memory
            .status()
            .await
            .inspect_err(|e| self.availability.note_failure(e))?;
        self.availability.set(true);
        Ok(status)
    }

    /// Store events explicitly. The events sent are marked persisted first, so
    /// automatic ingestion will not store them again.
    pub async fn store_manual(&self, events: &[ChatEvent]) -> Result<u64, MnemoError> {
        let sent: Vec<&ChatEvent> = events
            .iter()
            .filter(|e| !e.is_system && !e.text.trim().is_empty())
            .collect();
        if sent.is_empty() {
            return Ok(0);
        }
        {
            let mut dedup = self.dedup.lock().unwrap_or_else(PoisonError::into_inner);
            for e in &sent {
                dedup.mark_persisted(&e.id, &e.text);
            }
        }
        let request = StoreRequest {
            character: self.timeline.character(),
            messages: sent
                .iter()
                .map(|e| StoredMessage {
                    role: e.role.as_str().to_owned(),
                    name: e.display_name.clone(),
                    content: e.text.clone(),
                    timestamp: e.created_at.timestamp_millis(),
                    images: e.attachments.clone(),
                })
                .collect(),
            auto_stored: false,
        };
        let resp = self
            .memory
            .store(&request)
            .await
            .inspect_err(|e| self.availability.note_failure(e))?;
        tracing::info!(stored = resp.stored, total = ?resp.total_documents, "manual store");
        Ok(resp.stored)
    }

    pub async fn browse_memory(&self, query: &BrowseQuery) -> Result<BrowsePage, MnemoError> {
        Ok(self
            .memory
            .browse(query)
            .await
            .inspect_err(|e| self.availability.note_failure(e))?)
    }

    /// Newest stored documents first.
    pub async fn memory_history(&self, limit: usize) -> Result<Vec<MemoryDocument>, MnemoError> {
        Ok(self
            .memory
            .history(limit)
            .await
            .inspect_err(|e| self.availability.note_failure(e))?)
    }

    pub async fn memory_characters(&self) -> Result<Vec<CharacterSummary>, MnemoError> {
        Ok(self
            .memory
            .characters()
            .await
            .inspect_err(|e| self.availability.note_failure(e))?)
    }

    /// Remove stored documents. A request without ids or filters is refused
    /// here instead of being sent.
    pub async fn delete_memory(
        &self,
        request: &DeleteRequest,
    ) -> Result<DeleteResponse, MnemoError> {
        if request.is_empty() {
            return Err(MnemoError::InvalidRequest("delete request selects nothing".into()));
        }
        let resp = self
            .memory
            .delete(request)
            .await
            .inspect_err(|e| self.availability.note_failure(e))?;
        tracing::info!(
            deleted = resp.deleted,
            remaining = ?resp.remaining_documents,
            "memory deleted"
        );
        Ok(resp)
    }

    /// Drop every stored document. Returns how many were removed.
    pub async fn clear_memory(&self) -> Result<u64, MnemoError> {
        let resp = self
            .memory
            .clear_all()
            .await
            .inspect_err(|e| self.availability.note_failure(e))?;
        tracing::warn!(deleted = resp.deleted, "memory cleared");
        Ok(resp.deleted)
    }

    /// Stop pending settle timers, the recheck loop, and the feed consumer.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MnemoCfg;
    use crate::io::timeline::MemoryTimeline;
    use crate::settings::MemorySettings;
    use mnemo_backend::mock::MockBackend;
    use mnemo_backend::types::QueryHit;

    fn session(mock: Arc<MockBackend>, timeline: Arc<MemoryTimeline>) -> Session {
        Session::new(
            SharedCfg::new(MnemoCfg::default()),
            Backends::shared(mock),
            Arc::new(MemorySettings::new()),
            timeline,
            None,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn start_marks_backend_available() {
        let mock = Arc::new(MockBackend::new());
        let s = session(mock, Arc::new(MemoryTimeline::new("Keeper")));
        assert!(!s.availability().is_available());
        let state = s.start().await;
        assert!(s.availability().is_available());
        assert_eq!(state.active_variant, "en");
        s.shutdown();
    }

    #[tokio::test]
    async fn query_memory_surfaces_errors() {
        let mock = Arc::new(MockBackend::new().with_hits(vec![QueryHit::new("a", 0.1)]));
        let s = session(mock.clone(), Arc::new(MemoryTimeline::new("Keeper")));
        // Unfiltered: the user sees every hit with its score.
        assert_eq!(s.query_memory("a").await.unwrap().len(), 1);
        mock.set_fail_query(true);
        assert!(matches!(s.query_memory("a").await, Err(MnemoError::Backend(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_store_blocks_auto_ingest() {
        let mock = Arc::new(MockBackend::new());
        let timeline = Arc::new(MemoryTimeline::new("Keeper"));
        let s = session(mock.clone(), timeline.clone());
        s.start().await;

        let event = ChatEvent::user("m1", "Ana", "a message long enough to be stored");
        timeline.append(event.clone());
        assert_eq!(s.store_manual(std::slice::from_ref(&event)).await.unwrap(), 1);
        assert!(!mock.stored()[0].auto_stored);
        assert!(!s.observe(&event).is_scheduled());
        s.shutdown();
    }

    #[tokio::test]
    async fn status_failure_marks_unavailable() {
        let mock = Arc::new(MockBackend::new());
        let s = session(mock.clone(), Arc::new(MemoryTimeline::new("Keeper")));
        s.availability().set(true);
        mock.set_healthy(false);
        assert!(s.memory_status().await.is_err());
        assert!(!s.availability().is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_store_leaves_skipped_events_unmarked() {
        let mock = Arc::new(MockBackend::new());
        let timeline = Arc::new(MemoryTimeline::new("Keeper"));
        let s = session(mock.clone(), timeline.clone());
        s.start().await;

        let kept = ChatEvent::user("m1", "Ana", "a message long enough to be stored");
        let placeholder = ChatEvent::assistant("m2", "Keeper", "   ");
        assert_eq!(s.store_manual(&[kept, placeholder]).await.unwrap(), 1);

        // The blank placeholder later fills in; it was never sent, so ingestion takes it.
        let filled =
            ChatEvent::assistant("m2", "Keeper", "the reply arrived after the manual store");
        timeline.append(filled.clone());
        assert!(s.observe(&filled).is_scheduled());
        s.shutdown();
    }

    #[tokio::test]
    async fn management_operations_round_trip() {
        let mock = Arc::new(MockBackend::new());
        let s = session(mock.clone(), Arc::new(MemoryTimeline::new("Keeper")));
        let events = [
            ChatEvent::user("m1", "Ana", "first message stored by hand"),
            ChatEvent::assistant("m2", "Keeper", "second message stored by hand"),
        ];
        s.store_manual(&events).await.unwrap();

        let page = s.browse_memory(&BrowseQuery::default()).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(s.memory_history(10).await.unwrap().len(), 2);
        let chars = s.memory_characters().await.unwrap();
        assert_eq!((chars[0].name.as_str(), chars[0].manual), ("Keeper", 2));

        let first = page.documents[0].id.clone();
        let resp = s.delete_memory(&DeleteRequest::ids([first])).await.unwrap();
        assert_eq!(resp.deleted, 1);
        assert!(matches!(
            s.delete_memory(&DeleteRequest::default()).await,
            Err(MnemoError::InvalidRequest(_))
        ));
        assert_eq!(s.clear_memory().await.unwrap(), 1);
        assert_eq!(s.memory_status().await.unwrap().document_count, 0);
    }

    #[tokio::test]
    async fn management_failure_marks_unavailable() {
        let mock = Arc::new(MockBackend::new());
        let s = session(mock.clone(), Arc::new(MemoryTimeline::new("Keeper")));
        s.availability().set(true);
        mock.set_healthy(false);
        assert!(matches!(s.memory_history(5).await, Err(MnemoError::Backend(_))));
        assert!(!s.availability().is_available());
    }
}
