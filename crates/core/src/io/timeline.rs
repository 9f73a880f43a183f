use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::types::ChatEvent;

/// Read access to the host's message timeline.
///
/// The feed delivers events once, when they appear; the timeline answers what
/// an event looks like now, after edits, or that it is gone. An event
/// rejected as too short is not watched: the host must send it on the feed
/// again once it grows past the minimum length.
pub trait Timeline: Send + Sync {
    /// Current state of an event, or `None` if it left the timeline.
    fn snapshot(&self, event_id: &str) -> Option<ChatEvent>;
    /// Name of the character the conversation is held with.
    fn character(&self) -> String;
}

/// Feed sender: the host pushes newly rendered events here.
pub type FeedSender = mpsc::Sender<ChatEvent>;
/// Feed receiver: the ingestion pipeline consumes from here.
pub type FeedReceiver = mpsc::Receiver<ChatEvent>;

pub fn channel(buffer: usize) -> (FeedSender, FeedReceiver) {
    mpsc::channel(buffer)
}

/// Announce an event on the feed.
pub async fn submit(
    tx: &FeedSender,
    event: ChatEvent,
) -> Result<(), mpsc::error::SendError<ChatEvent>> {
    tx.send(event).await
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Timeline held in process, for hosts that own their own transcript.
#[derive(Debug, Default)]
pub struct MemoryTimeline {
    events: Mutex<Vec<ChatEvent>>,
    character: Mutex<String>,
}

impl MemoryTimeline {
    pub fn new(character: impl Into<String>) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            character: Mutex::new(character.into()),
        }
    }

    pub fn append(&self, event: ChatEvent) {
        lock(&self.events).push(event);
    }

    /// Replace an event's text. Returns false if the event is unknown.
    pub fn edit(&self, event_id: &str, text: impl Into<String>) -> bool {
        match lock(&self.events).iter_mut().find(|e| e.id == event_id) {
            Some(event) => {
                event.text = text.into();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, event_id: &str) -> bool {
        let mut events = lock(&self.events);
        let before = events.len();
        events.retain(|e| e.id != event_id);
        events.len() != before
    }

    pub fn set_character(&self, name: impl Into<String>) {
        *lock(&self.character) = name.into();
    }

    /// All events, oldest first.
    pub fn events(&self) -> Vec<ChatEvent> {
        lock(&self.events).clone()
    }

    /// The newest `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ChatEvent> {
        let events = lock(&self.events);
        let start = events.len().saturating_sub(limit);
        events[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.events).is_empty()
    }
}

impl Timeline for MemoryTimeline {
    fn snapshot(&self, event_id: &str) -> Option<ChatEvent> {
        lock(&self.events).iter().find(|e| e.id == event_id).cloned()
    }

    fn character(&self) -> String {
        lock(&self.character).clone()
    }
}
