//! In-process event bus
//!
//! Fan-out of library and playback notifications to whoever subscribes
//! (UI shells, widgets, tests). Delivery order across listener types is not
//! guaranteed; sending with no subscribers is fine.

use crate::types::{BookId, PlayState};
use tokio::sync::broadcast;

/// Notifications published by the library and the player controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The set of known books changed (added, removed, hidden, revealed)
    BookSetChanged,
    /// A single book's content changed (position, speed, bookmarks, name)
    BookContentChanged(BookId),
    /// The playback position of the current book moved
    PositionChanged,
    /// Play/pause/stop state changed
    PlayStateChanged(PlayState),
    /// Sleep timer armed or disarmed
    SleepStateChanged { active: bool },
    /// A different book became the current one
    CurrentBookIdChanged { old: BookId },
    /// The folder scanner started or finished
    ScannerStateChanged,
    /// The current book's backing file disappeared; UI should return to the
    /// shelf
    BookFileMissing(BookId),
}

/// Cloneable handle to the broadcast channel backing the bus
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Publishes an event. A send with no live subscribers is not an error.
    pub fn send(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Registers a new listener
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn book_set_changed(&self) {
        self.send(Event::BookSetChanged);
    }

    pub fn book_content_changed(&self, id: BookId) {
        self.send(Event::BookContentChanged(id));
    }

    pub fn position_changed(&self) {
        self.send(Event::PositionChanged);
    }

    pub fn play_state_changed(&self, state: PlayState) {
        self.send(Event::PlayStateChanged(state));
    }

    pub fn sleep_state_changed(&self, active: bool) {
        self.send(Event::SleepStateChanged { active });
    }

    pub fn current_book_id_changed(&self, old: BookId) {
        self.send(Event::CurrentBookIdChanged { old });
    }

    pub fn scanner_state_changed(&self) {
        self.send(Event::ScannerStateChanged);
    }

    pub fn book_file_missing(&self, id: BookId) {
        self.send(Event::BookFileMissing(id));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_to_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.play_state_changed(PlayState::Playing);

        assert_eq!(
            rx1.recv().await.unwrap(),
            Event::PlayStateChanged(PlayState::Playing)
        );
        assert_eq!(
            rx2.recv().await.unwrap(),
            Event::PlayStateChanged(PlayState::Playing)
        );
    }

    #[tokio::test]
    async fn test_send_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.book_set_changed();
        bus.position_changed();
    }

    #[tokio::test]
    async fn test_unsubscribed_listener_misses_events() {
        let bus = EventBus::new();
        bus.sleep_state_changed(true);

        // subscribed after the send, must not see the event
        let mut rx = bus.subscribe();
        bus.sleep_state_changed(false);
        assert_eq!(
            rx.recv().await.unwrap(),
            Event::SleepStateChanged { active: false }
        );
    }
}
