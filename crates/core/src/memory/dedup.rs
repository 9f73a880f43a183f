use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

/// Deduplicator shared between the feed handler and settle tasks.
pub type SharedDedup = Arc<Mutex<EventDeduplicator>>;

/// Insertion-ordered set of keys with a ceiling. Crossing the ceiling drops
/// the oldest keys in one batch, down to about half of it.
#[derive(Debug)]
pub struct DedupRecord {
    order: VecDeque<String>,
    members: HashSet<String>,
    ceiling: usize,
}

impl DedupRecord {
    pub fn new(ceiling: usize) -> Self {
        let ceiling = ceiling.max(2);
        Self {
            order: VecDeque::with_capacity(ceiling + 1),
            members: HashSet::with_capacity(ceiling + 1),
            ceiling,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.members.contains(key)
    }

    /// Insert and enforce the bound. Returns false if the key was already held.
    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        let added = self.push(key.into());
        self.enforce_bound();
        added
    }

    fn push(&mut self, key: String) -> bool {
        if !self.members.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        true
    }

    /// Evict oldest-first once the ceiling is exceeded, down to ceiling / 2
    /// rounded up to an even count so keys pushed in pairs leave together.
    /// Returns the number of keys dropped.
    fn enforce_bound(&mut self) -> usize {
        if self.order.len() <= self.ceiling {
            return 0;
        }
        let target = (self.ceiling / 2).next_multiple_of(2);
        let mut evicted = 0;
        while self.order.len() > target {
            match self.order.pop_front() {
                Some(old) => {
                    self.members.remove(&old);
                    evicted += 1;
                }
                None => break,
            }
        }
        tracing::debug!(evicted, kept = self.order.len(), "dedup record trimmed");
        evicted
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }
}

/// Why an event may not be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Persist,
    TooShort,
    Duplicate,
}

/// `<id>_<hash of text>`; the id keeps fingerprints of different events apart
/// even when their text matches.
pub fn fingerprint(event_id: &str, text: &str) -> String {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    format!("{event_id}_{:016x}", hasher.finish())
}

/// Length as the user sees it: characters after trimming whitespace.
pub fn visible_len(text: &str) -> usize {
    text.trim().chars().count()
}

/// Remembers which chat events were already handed to the memory store.
#[derive(Debug)]
pub struct EventDeduplicator {
    record: DedupRecord,
    min_chars: usize,
}

impl EventDeduplicator {
    pub fn new(ceiling: usize, min_chars: usize) -> Self {
        Self {
            record: DedupRecord::new(ceiling),
            min_chars,
        }
    }

    pub fn shared(ceiling: usize, min_chars: usize) -> SharedDedup {
        Arc::new(Mutex::new(Self::new(ceiling, min_chars)))
    }

    pub fn set_min_chars(&mut self, min_chars: usize) {
        self.min_chars = min_chars;
    }

    pub fn check(&self, event_id: &str, text: &str) -> Verdict {
        if visible_len(text) < self.min_chars {
            Verdict::TooShort
        } else if self.record.contains(event_id)
            || self.record.contains(&fingerprint(event_id, text))
        {
            Verdict::Duplicate
        } else {
            Verdict::Persist
        }
    }

    pub fn should_persist(&self, event_id: &str, text: &str) -> bool {
        self.check(event_id, text) == Verdict::Persist
    }

    /// Record both the bare id and the content fingerprint, then enforce the
    /// bound once. An id already recorded is left as is.
    pub fn mark_persisted(&mut self, event_id: &str, text: &str) {
        if self.record.contains(event_id) {
            return;
        }
        self.record.push(event_id.to_owned());
        self.record.push(fingerprint(event_id, text));
        self.record.enforce_bound();
    }

    pub fn is_marked(&self, event_id: &str) -> bool {
        self.record.contains(event_id)
    }

    pub fn len(&self) -> usize {
        self.record.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG: &str = "this message is long enough to keep";

    #[test]
    fn short_text_rejected() {
        let d = EventDeduplicator::new(1000, 20);
        assert_eq!(d.check("m1", "nineteen characters"), Verdict::TooShort);
        assert_eq!(d.check("m1", "   padded but short    "), Verdict::TooShort);
        assert!(d.should_persist("m1", "twenty characters!!!"));
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let d = EventDeduplicator::new(1000, 5);
        assert!(d.should_persist("m1", "안녕하세요"));
        assert!(!d.should_persist("m1", "안녕하세"));
    }

    #[test]
    fn marked_id_blocks_even_with_new_text() {
        let mut d = EventDeduplicator::new(1000, 20);
        d.mark_persisted("m1", LONG);
        assert_eq!(d.check("m1", LONG), Verdict::Duplicate);
        assert_eq!(d.check("m1", "an edited but still sufficiently long text"), Verdict::Duplicate);
        assert!(d.should_persist("m2", LONG));
    }

    #[test]
    fn fingerprint_is_stable_and_id_scoped() {
        assert_eq!(fingerprint("a", LONG), fingerprint("a", LONG));
        assert_ne!(fingerprint("a", LONG), fingerprint("b", LONG));
        assert!(fingerprint("a", LONG).starts_with("a_"));
    }

    #[test]
    fn exceeding_ceiling_halves_record() {
        let n = 10;
        let mut r = DedupRecord::new(n);
        for i in 0..=n {
            r.insert(format!("k{i}"));
        }
        assert!(r.len() <= n / 2 + 1);
        assert!(r.contains(&format!("k{n}")));
        assert!(!r.contains("k0"));
    }

    #[test]
    fn record_never_exceeds_ceiling() {
        let mut r = DedupRecord::new(7);
        for i in 0..100 {
            r.insert(format!("k{i}"));
            assert!(r.len() <= r.ceiling());
            assert!(r.contains(&format!("k{i}")));
        }
    }

    #[test]
    fn tiny_ceiling_clamped() {
        let mut r = DedupRecord::new(0);
        assert_eq!(r.ceiling(), 2);
        for i in 0..5 {
            r.insert(format!("k{i}"));
        }
        assert!(r.contains("k4"));
    }

    #[test]
    fn reinsert_does_not_duplicate() {
        let mut r = DedupRecord::new(10);
        assert!(r.insert("a"));
        assert!(!r.insert("a"));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn deduplicator_bounded_by_ceiling() {
        let mut d = EventDeduplicator::new(10, 1);
        for i in 0..50 {
            d.mark_persisted(&format!("m{i}"), LONG);
        }
        assert!(d.len() <= 10);
        assert!(d.is_marked("m49"));
        assert!(!d.is_marked("m0"));
    }

    #[test]
    fn eviction_keeps_id_and_fingerprint_together() {
        for ceiling in 2..12 {
            let mut d = EventDeduplicator::new(ceiling, 1);
            for i in 0..20 {
                d.mark_persisted(&format!("m{i}"), LONG);
                for j in 0..=i {
                    let id = format!("m{j}");
                    assert_eq!(
                        d.is_marked(&id),
                        d.record.contains(&fingerprint(&id, LONG)),
                        "ceiling {ceiling}, {id} split after {i} marks"
                    );
                }
                assert!(d.len() <= ceiling.max(2));
                assert!(d.is_marked(&format!("m{i}")));
            }
        }
    }

    #[test]
    fn remarking_an_id_adds_nothing() {
        let mut d = EventDeduplicator::new(1000, 1);
        d.mark_persisted("m1", LONG);
        d.mark_persisted("m1", "different text entirely");
        assert_eq!(d.len(), 2);
    }
}
