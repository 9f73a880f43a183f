//! End-to-end tests over a full `Session` against the in-memory backend.
//!
//! Time is paused, so settle delays and slow loads run deterministically.

use std::sync::Arc;
use std::time::Duration;

use mnemo_backend::mock::MockBackend;
use mnemo_backend::types::{LanguageEntry, QueryHit, VariantPayload};
use mnemo_core::config::{MnemoCfg, SharedCfg};
use mnemo_core::io::timeline::{self, MemoryTimeline};
use mnemo_core::memory::ingest::{SeenOutcome, SettleOutcome};
use mnemo_core::memory::inject::{InjectionOutcome, SkipReason};
use mnemo_core::settings::{LANGUAGE_OVERRIDE, MemorySettings, SettingsStore};
use mnemo_core::types::{ChatEvent, OutgoingRequest};
use mnemo_core::{Backends, Session};

fn payload(entries: &[(&str, &str)]) -> VariantPayload {
    VariantPayload::new(entries.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())))
}

struct Harness {
    mock: Arc<MockBackend>,
    timeline: Arc<MemoryTimeline>,
    settings: Arc<MemorySettings>,
    session: Session,
}

fn harness(mock: MockBackend, cfg: MnemoCfg) -> Harness {
    let mock = Arc::new(mock);
    let timeline = Arc::new(MemoryTimeline::new("Keeper"));
    let settings = Arc::new(MemorySettings::new());
    let session = Session::new(
        SharedCfg::new(cfg),
        Backends::shared(mock.clone()),
        settings.clone(),
        timeline.clone(),
        None,
    );
    Harness {
        mock,
        timeline,
        settings,
        session,
    }
}

#[tokio::test(start_paused = true)]
async fn nineteen_characters_never_persisted() {
    let h = harness(MockBackend::new(), MnemoCfg::default());
    h.session.start().await;

    let text = "a".repeat(19);
    let event = ChatEvent::user("m1", "Ana", text);
    h.timeline.append(event.clone());
    assert!(matches!(h.session.observe(&event), SeenOutcome::Ignored(_)));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(h.mock.stored().is_empty());
    h.session.shutdown();
}

#[tokio::test(start_paused = true)]
async fn text_growing_during_delay_persisted_once() {
    let h = harness(MockBackend::new(), MnemoCfg::default());
    h.session.start().await;

    let (tx, rx) = timeline::channel(16);
    let consumer = h.session.spawn_ingestion(rx);

    let event = ChatEvent::assistant("m1", "Keeper", "a".repeat(21));
    h.timeline.append(event.clone());
    timeline::submit(&tx, event.clone()).await.unwrap();

    // Streaming completes before the settle delay ends.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    h.timeline.edit("m1", "a".repeat(25));

    // The host re-announces the finished message; it must not store twice.
    let mut finished = event.clone();
    finished.text = "a".repeat(25);
    timeline::submit(&tx, finished).await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    let stored = h.mock.stored();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].messages[0].content.chars().count(), 25);
    assert_eq!(stored[0].messages[0].role, "assistant");
    assert_eq!(h.mock.registered().len(), 1);

    h.session.shutdown();
    consumer.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn short_event_grown_after_delay_needs_reannounce() {
    let h = harness(MockBackend::new(), MnemoCfg::default());
    h.session.start().await;

    let (tx, rx) = timeline::channel(16);
    let consumer = h.session.spawn_ingestion(rx);

    let event = ChatEvent::assistant("m1", "Keeper", "a".repeat(19));
    h.timeline.append(event.clone());
    timeline::submit(&tx, event.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(h.mock.stored().is_empty());

    // Growing on the timeline alone schedules nothing.
    h.timeline.edit("m1", "a".repeat(25));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(h.mock.stored().is_empty());

    let mut grown = event.clone();
    grown.text = "a".repeat(25);
    timeline::submit(&tx, grown.clone()).await.unwrap();
    timeline::submit(&tx, grown).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    let stored = h.mock.stored();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].messages[0].content.chars().count(), 25);

    h.session.shutdown();
    consumer.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn edit_into_duplicate_is_suppressed() {
    let h = harness(MockBackend::new(), MnemoCfg::default());
    h.session.start().await;

    let text = "the keeper lit the lamp at dusk";
    let first = ChatEvent::user("m1", "Ana", text);
    h.timeline.append(first.clone());
    let SeenOutcome::Scheduled(handle) = h.session.observe(&first) else {
        panic!("expected scheduled");
    };
    assert!(matches!(handle.outcome().await, SettleOutcome::Persisted(_)));

    // Same id re-rendered with a new text: the bare id already marks it.
    h.timeline.edit("m1", "the keeper lit the lamp at dawn");
    let again = h.timeline.events()[0].clone();
    assert!(matches!(h.session.observe(&again), SeenOutcome::Ignored(_)));
    assert_eq!(h.mock.stored().len(), 1);
    h.session.shutdown();
}

#[tokio::test(start_paused = true)]
async fn registry_failure_does_not_block_store() {
    let h = harness(MockBackend::new(), MnemoCfg::default());
    h.session.start().await;
    h.mock.set_fail_register(true);

    let event = ChatEvent::user("m1", "Ana", "a message that is clearly long enough");
    h.timeline.append(event.clone());
    let SeenOutcome::Scheduled(handle) = h.session.observe(&event) else {
        panic!("expected scheduled");
    };
    let SettleOutcome::Persisted(report) = handle.outcome().await else {
        panic!("expected persisted");
    };
    assert!(report.stored.is_ok());
    assert!(matches!(report.registered, Some(Err(_))));
    assert_eq!(h.mock.stored().len(), 1);
    h.session.shutdown();
}

#[tokio::test(start_paused = true)]
async fn budget_and_threshold_shape_injected_block() {
    let long = "m".repeat(800);
    let mock = MockBackend::new().with_hits(vec![
        QueryHit::new(long.clone(), 0.9),
        QueryHit::new("dropped by threshold", 0.2),
        QueryHit::new(long.clone(), 0.8),
        QueryHit::new(long, 0.7),
    ]);
    let h = harness(mock, MnemoCfg::default());
    h.session.start().await;

    let ask = ChatEvent::user("u1", "Ana", "remember the storm?");
    let mut request = OutgoingRequest::new("", vec![ask]);
    let outcome = h.session.prepare_request(&mut request).await;
    let InjectionOutcome::Injected { passages, chars, truncated } = outcome else {
        panic!("expected injection, got {outcome:?}");
    };
    assert_eq!((passages, chars, truncated), (2, 1500, true));
    assert!(!request.system_prompt.contains("dropped by threshold"));
    assert!(request.system_prompt.contains(&format!("{}...", "m".repeat(697))));
    assert!(!request.system_prompt.contains(&"m".repeat(698 + 800)));
    h.session.shutdown();
}

#[tokio::test(start_paused = true)]
async fn threshold_keeps_service_order() {
    let mock = MockBackend::new().with_hits(vec![
        QueryHit::new("first passage", 0.5),
        QueryHit::new("second passage", 0.2),
        QueryHit::new("third passage", 0.9),
    ]);
    let h = harness(mock, MnemoCfg::default());
    h.session.start().await;

    let ask = ChatEvent::user("u1", "Ana", "passages please");
    let mut request = OutgoingRequest::new("", vec![ask]);
    h.session.prepare_request(&mut request).await;
    let prompt = &request.system_prompt;
    assert!(!prompt.contains("second passage"));
    let first = prompt.find("first passage").unwrap();
    let third = prompt.find("third passage").unwrap();
    assert!(first < third);
    assert!(prompt.contains("first passage\n---\nthird passage"));
    h.session.shutdown();
}

#[tokio::test(start_paused = true)]
async fn unavailable_backend_short_circuits_both_pipelines() {
    let mock = MockBackend::new()
        .with_health_failures(100)
        .with_hits(vec![QueryHit::new("never seen", 0.9)]);
    let h = harness(mock, MnemoCfg::default());
    h.session.start().await;
    assert!(!h.session.availability().is_available());
    assert_eq!(h.mock.health_calls(), 3);

    let event = ChatEvent::user("m1", "Ana", "a message that is clearly long enough");
    h.timeline.append(event.clone());
    assert!(matches!(h.session.observe(&event), SeenOutcome::Ignored(_)));

    let mut request = OutgoingRequest::new("sys", vec![event]);
    let outcome = h.session.prepare_request(&mut request).await;
    assert!(matches!(outcome, InjectionOutcome::Skipped(SkipReason::BackendUnavailable)));
    assert_eq!(request.system_prompt, "sys");
    assert!(h.mock.queries().is_empty());
    assert!(h.mock.stored().is_empty());
    h.session.shutdown();
}

#[tokio::test(start_paused = true)]
async fn fallback_chain_across_tiers() {
    let mock = MockBackend::new()
        .with_languages(vec![
            LanguageEntry::named("en", "English", "English"),
            LanguageEntry::named("ko", "Korean", "한국어"),
        ])
        .with_variant(
            "en",
            payload(&[("plugin.title", "Memory Plugin"), ("custom.only_default", "Default only")]),
        )
        .with_variant("ko", payload(&[("plugin.title", "메모리"), ("settings.language", "  ")]));
    let h = harness(mock, MnemoCfg::default());
    h.session.start().await;

    let state = h.session.switch_language("ko").await;
    assert_eq!(state.active_variant, "ko");
    let r = h.session.resolver();
    assert_eq!(r.t("plugin.title"), "메모리");
    // Blank in the active set falls through to the default set, then the bundled strings.
    assert_eq!(r.t("custom.only_default"), "Default only");
    assert_eq!(r.t("settings.language"), "Language");
    assert_eq!(r.t("no.such.key"), "no.such.key");
    assert_eq!(h.settings.get(LANGUAGE_OVERRIDE).as_deref(), Some("ko"));
    assert!(r.coverage().missing_keys.contains(&"settings.language".to_owned()));
    h.session.shutdown();
}

#[tokio::test(start_paused = true)]
async fn newer_switch_wins_over_slow_older_one() {
    let mock = MockBackend::new()
        .with_languages(vec![
            LanguageEntry::new("en"),
            LanguageEntry::new("fr"),
            LanguageEntry::new("de"),
        ])
        .with_variant("fr", payload(&[("plugin.title", "Mémoire")]))
        .with_variant_delay("fr", Duration::from_millis(500))
        .with_variant("de", payload(&[("plugin.title", "Gedächtnis")]));
    let h = harness(mock, MnemoCfg::default());
    h.session.start().await;

    let (slow, fast) = tokio::join!(
        h.session.switch_language("fr"),
        h.session.switch_language("de")
    );
    assert_eq!(fast.active_variant, "de");
    assert_eq!(slow.active_variant, "de");
    assert_eq!(h.session.resolver().active_code(), "de");
    assert_eq!(h.session.resolver().t("plugin.title"), "Gedächtnis");
    h.session.shutdown();
}

#[tokio::test(start_paused = true)]
async fn persisted_override_applied_on_start() {
    let mock = MockBackend::new()
        .with_languages(vec![LanguageEntry::new("en"), LanguageEntry::new("ja")])
        .with_variant("ja", payload(&[("plugin.title", "メモリ")]));
    let h = harness(mock, MnemoCfg::default());
    h.settings.set(LANGUAGE_OVERRIDE, "ja").unwrap();

    let state = h.session.start().await;
    assert_eq!(state.active_variant, "ja");
    assert_eq!(h.session.resolver().t("plugin.title"), "メモリ");
    assert_eq!(h.session.resolver().available_variants().len(), 2);
    h.session.shutdown();
}
