//! Auto-ingestion: `Seen -> (settle delay) -> Settled | Suppressed` per event.

use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;

use mnemo_backend::types::{RegisterRequest, RegisteredDocument, StoreRequest, StoredMessage};
use mnemo_backend::{ChunkRegistry, MemoryBackend};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SharedCfg;
use crate::error::MnemoError;
use crate::io::timeline::{FeedReceiver, Timeline};
use crate::memory::availability::Availability;
use crate::memory::dedup::{EventDeduplicator, SharedDedup, Verdict};
use crate::types::ChatEvent;

/// Why an event was not scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Disabled,
    BackendUnavailable,
    SystemEvent,
    TooShort,
    AlreadyPersisted,
}

#[derive(Debug)]
pub enum SeenOutcome {
    Scheduled(SettleHandle),
    Ignored(IgnoreReason),
}

impl SeenOutcome {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled(_))
    }
}

/// Why a scheduled event was dropped when its timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    Disabled,
    BackendUnavailable,
    /// The event left the timeline during the delay.
    Vanished,
    TooShort,
    Duplicate,
    Cancelled,
}

/// Result of the two persistence calls. They fail independently.
#[derive(Debug)]
pub struct PersistReport {
    /// Messages stored, from the memory service.
    pub stored: Result<u64, MnemoError>,
    /// Chunk id from the registry. `None` when the store call failed and
    /// registration was not attempted.
    pub registered: Option<Result<Option<String>, MnemoError>>,
}

#[derive(Debug)]
pub enum SettleOutcome {
    Persisted(PersistReport),
    Suppressed(SuppressReason),
}

/// A pending settle check.
#[derive(Debug)]
pub struct SettleHandle {
    event_id: String,
    cancel: CancellationToken,
    join: JoinHandle<SettleOutcome>,
}

impl SettleHandle {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Stop the timer; a check already running is not interrupted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn outcome(self) -> SettleOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(event_id = %self.event_id, error = %e, "settle task failed");
                SettleOutcome::Suppressed(SuppressReason::Cancelled)
            }
        }
    }
}

fn lock(dedup: &SharedDedup) -> MutexGuard<'_, EventDeduplicator> {
    dedup.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Watches the chat feed and persists settled messages to the memory service.
#[derive(Clone)]
pub struct IngestionPipeline {
    cfg: SharedCfg,
    dedup: SharedDedup,
    availability: Availability,
    store: Arc<dyn MemoryBackend>,
    registry: Arc<dyn ChunkRegistry>,
    timeline: Arc<dyn Timeline>,
    session_id: Uuid,
    shutdown: CancellationToken,
}

impl IngestionPipeline {
    pub fn new(
        cfg: SharedCfg,
        dedup: SharedDedup,
        availability: Availability,
        store: Arc<dyn MemoryBackend>,
        registry: Arc<dyn ChunkRegistry>,
        timeline: Arc<dyn Timeline>,
    ) -> Self {
        Self {
            cfg,
            dedup,
            availability,
            store,
            registry,
            timeline,
            session_id: Uuid::new_v4(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = session_id;
        self
    }

    /// Pending settle timers are children of `token`.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Gate a newly seen event and, if it passes, start its settle timer.
    pub fn on_seen(&self, event: &ChatEvent) -> SeenOutcome {
        let (enabled, min_chars, delay_ms) =
            self.cfg.read(|c| (c.auto_ingest, c.min_content_chars, c.settle_delay_ms));
        if !enabled {
            return SeenOutcome::Ignored(IgnoreReason::Disabled);
        }
        if !self.availability.is_available() {
            return SeenOutcome::Ignored(IgnoreReason::BackendUnavailable);
        }
        if event.is_system {
            return SeenOutcome::Ignored(IgnoreReason::SystemEvent);
        }
        let verdict = {
            let mut dedup = lock(&self.dedup);
            dedup.set_min_chars(min_chars);
            dedup.check(&event.id, &event.text)
        };
        match verdict {
            Verdict::TooShort => return SeenOutcome::Ignored(IgnoreReason::TooShort),
            Verdict::Duplicate => return SeenOutcome::Ignored(IgnoreReason::AlreadyPersisted),
            Verdict::Persist => {}
        }

        let cancel = self.shutdown.child_token();
        let pipeline = self.clone();
        let id = event.id.clone();
        let timer = cancel.clone();
        let delay = Duration::from_millis(delay_ms);
        tracing::debug!(event_id = %id, delay_ms, "settle scheduled");
        let join = tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => SettleOutcome::Suppressed(SuppressReason::Cancelled),
                _ = tokio::time::sleep(delay) => pipeline.settle(&id).await,
            }
        });
        SeenOutcome::Scheduled(SettleHandle {
            event_id: event.id.clone(),
            cancel,
            join,
        })
    }

    /// Re-validate the event as it is now and persist it once.
    pub async fn settle(&self, event_id: &str) -> SettleOutcome {
        let (enabled, min_chars) = self.cfg.read(|c| (c.auto_ingest, c.min_content_chars));
        if !enabled {
            return SettleOutcome::Suppressed(SuppressReason::Disabled);
        }
        if !self.availability.is_available() {
            return SettleOutcome::Suppressed(SuppressReason::BackendUnavailable);
        }
        let Some(event) = self.timeline.snapshot(event_id) else {
            tracing::debug!(event_id, "event vanished before settling");
            return SettleOutcome::Suppressed(SuppressReason::Vanished);
        };

        // Check and mark under one lock so two settles of the same event cannot both pass.
        {
            let mut dedup = lock(&self.dedup);
            dedup.set_min_chars(min_chars);
            match dedup.check(&event.id, &event.text) {
                Verdict::TooShort => return SettleOutcome::Suppressed(SuppressReason::TooShort),
                Verdict::Duplicate => return SettleOutcome::Suppressed(SuppressReason::Duplicate),
                Verdict::Persist => dedup.mark_persisted(&event.id, &event.text),
            }
        }

        SettleOutcome::Persisted(self.persist(&event).await)
    }

    async fn persist(&self, event: &ChatEvent) -> PersistReport {
        let character = self.timeline.character();
        let request = StoreRequest {
            character: character.clone(),
            messages: vec![StoredMessage {
                role: event.role.as_str().to_owned(),
                name: event.display_name.clone(),
                content: event.text.clone(),
                timestamp: event.created_at.timestamp_millis(),
                images: event.attachments.clone(),
            }],
            auto_stored: true,
        };

        let stored = match self.store.store(&request).await {
            Ok(resp) => {
                tracing::info!(event_id = %event.id, stored = resp.stored, "message ingested");
                Ok(resp.stored)
            }
            Err(e) => {
                tracing::warn!(event_id = %event.id, error = %e, "ingestion store failed");
                self.availability.note_failure(&e);
                Err(MnemoError::Ingestion(e.to_string()))
            }
        };
        if stored.is_err() {
            return PersistReport {
                stored,
                registered: None,
            };
        }

        let register = RegisterRequest {
            documents: vec![RegisteredDocument {
                id: event.id.clone(),
                text: event.text.clone(),
                role: event.role.as_str().to_owned(),
                name: event.display_name.clone(),
                timestamp: event.created_at.timestamp_millis(),
            }],
            character,
            metadata: serde_json::json!({
                "source": "auto_ingest",
                "session": self.session_id.to_string(),
            }),
        };
        let registered = match self.registry.register(&register).await {
            Ok(resp) => {
                tracing::debug!(
                    event_id = %event.id,
                    chunk_id = ?resp.chunk_id,
                    "chunk registered"
                );
                Ok(resp.chunk_id)
            }
            Err(e) => {
                tracing::debug!(event_id = %event.id, error = %e, "chunk registration failed");
                Err(MnemoError::from(e))
            }
        };
        PersistReport {
            stored,
            registered: Some(registered),
        }
    }

    /// Consume the feed until it closes or `token` is cancelled.
    pub async fn run(self, mut feed: FeedReceiver, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("ingestion stopped");
                    break;
                }
                event = feed.recv() => match event {
                    Some(event) => {
                        if let SeenOutcome::Ignored(reason) = self.on_seen(&event) {
                            tracing::trace!(event_id = %event.id, ?reason, "event ignored");
                        }
                    }
                    None => break,
                },
            }
        }
    }
}
