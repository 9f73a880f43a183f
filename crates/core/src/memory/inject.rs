//! Retrieval augmentation: pull relevant memories into the outgoing request
//! as hidden background context.

use std::sync::Arc;

use mnemo_backend::MemoryBackend;

use crate::config::SharedCfg;
use crate::error::MnemoError;
use crate::memory::availability::Availability;
use crate::types::{OutgoingRequest, RetrievalCandidate};

/// Appended to a passage cut short by the budget; counted against it.
pub const TRUNCATION_MARKER: &str = "...";
pub const PASSAGE_SEPARATOR: &str = "\n---\n";

const FRAME_HEADER: &str = "## Background Memories\n\
The passages below come from earlier conversations. \
Treat them as private background knowledge. \
Do not quote or summarize them, do not remark on them, \
and do not make your reply longer because of them.\n";
const FRAME_FOOTER: &str = "\n## End of Background Memories";

/// Passages chosen to fit the budget.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub passages: Vec<String>,
    /// Characters used, marker included.
    pub chars: usize,
    pub truncated: bool,
}

/// Keep candidates at or above `min_score`, in service order.
pub fn eligible(candidates: Vec<RetrievalCandidate>, min_score: f32) -> Vec<RetrievalCandidate> {
    candidates
        .into_iter()
        .filter(|c| c.score >= min_score && !c.text.trim().is_empty())
        .collect()
}

/// Fill `budget` characters with whole passages in order. The first passage
/// that does not fit is cut to the remaining headroom (marker included) when
/// at least `min_headroom` characters remain; selection then stops.
pub fn select_passages(
    candidates: &[RetrievalCandidate],
    budget: usize,
    min_headroom: usize,
) -> Selection {
    let marker_len = TRUNCATION_MARKER.chars().count();
    let mut selection = Selection::default();
    for candidate in candidates {
        let len = candidate.text.chars().count();
        if selection.chars + len <= budget {
            selection.passages.push(candidate.text.clone());
            selection.chars += len;
            continue;
        }
        let headroom = budget - selection.chars;
        if headroom >= min_headroom && headroom > marker_len {
            let mut cut: String = candidate.text.chars().take(headroom - marker_len).collect();
            cut.push_str(TRUNCATION_MARKER);
            selection.passages.push(cut);
            selection.chars += headroom;
            selection.truncated = true;
        }
        break;
    }
    selection
}

/// Wrap passages in the instruction frame.
pub fn frame(passages: &[String]) -> String {
    format!("{FRAME_HEADER}{}{FRAME_FOOTER}", passages.join(PASSAGE_SEPARATOR))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    BackendUnavailable,
    NoUserContent,
    NothingRelevant,
}

#[derive(Debug)]
pub enum InjectionOutcome {
    Injected { passages: usize, chars: usize, truncated: bool },
    Skipped(SkipReason),
    /// Retrieval failed; the request went on unchanged.
    Failed(MnemoError),
}

/// Augments outgoing requests with retrieved memories.
#[derive(Clone)]
pub struct RetrievalInjector {
    cfg: SharedCfg,
    availability: Availability,
    store: Arc<dyn MemoryBackend>,
}

impl RetrievalInjector {
    pub fn new(cfg: SharedCfg, availability: Availability, store: Arc<dyn MemoryBackend>) -> Self {
        Self {
            cfg,
            availability,
            store,
        }
    }

    /// Settings are read here, per request, so changes apply to the next send.
    pub async fn inject(&self, request: &mut OutgoingRequest) -> InjectionOutcome {
        let (enabled, k, min_score, budget, min_headroom) = self.cfg.read(|c| {
            (
                c.inject_enabled,
                c.retrieval_k,
                c.min_relevance,
                c.injection_budget_chars,
                c.min_truncation_chars,
            )
        });
        if !enabled {
            return InjectionOutcome::Skipped(SkipReason::Disabled);
        }
        if !self.availability.is_available() {
            return InjectionOutcome::Skipped(SkipReason::BackendUnavailable);
        }
        let Some(query) = request.latest_user_text().map(str::to_owned) else {
            return InjectionOutcome::Skipped(SkipReason::NoUserContent);
        };

        let hits = match self.store.query(&query, k).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "memory retrieval failed, sending without memories");
                self.availability.note_failure(&e);
                return InjectionOutcome::Failed(MnemoError::Augmentation(e.to_string()));
            }
        };
        let returned = hits.len();
        let candidates =
            eligible(hits.into_iter().map(RetrievalCandidate::from).collect(), min_score);
        let selection = select_passages(&candidates, budget, min_headroom);
        if selection.passages.is_empty() {
            tracing::debug!(returned, eligible = candidates.len(), "no memories to inject");
            return InjectionOutcome::Skipped(SkipReason::NothingRelevant);
        }

        request.append_system(&frame(&selection.passages));
        tracing::info!(
            passages = selection.passages.len(),
            chars = selection.chars,
            truncated = selection.truncated,
            "memories injected"
        );
        InjectionOutcome::Injected {
            passages: selection.passages.len(),
            chars: selection.chars,
            truncated: selection.truncated,
        }
    }
}
