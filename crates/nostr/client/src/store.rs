//! Content-addressed cache of events already accepted from relays.

use nostr::Event;
use std::collections::{HashMap, VecDeque};

/// Result of [`EventStore::put_if_absent`].
#[derive(Debug, Clone)]
pub struct PutOutcome {
    /// True only for the first insertion of this id.
    pub inserted: bool,
    /// The stored copy, which is what subscribers receive.
    pub event: Event,
}

/// Append-only event cache keyed by event id.
///
/// With a capacity the oldest insertion is evicted first. Eviction only bounds
/// memory; an evicted event is simply verified and stored again if it returns.
#[derive(Debug, Default)]
pub struct EventStore {
    events: HashMap<String, Event>,
    insertion_order: VecDeque<String>,
    capacity: Option<usize>,
}

impl EventStore {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            events: HashMap::new(),
            insertion_order: VecDeque::new(),
            capacity: capacity.filter(|capacity| *capacity > 0),
        }
    }

    pub fn put_if_absent(&mut self, event: Event) -> PutOutcome {
        if let Some(existing) = self.events.get(&event.id) {
            return PutOutcome {
                inserted: false,
                event: existing.clone(),
            };
        }

        if let Some(capacity) = self.capacity {
            while self.events.len() >= capacity {
                let Some(oldest) = self.insertion_order.pop_front() else {
                    break;
                };
                self.events.remove(&oldest);
            }
        }

        self.insertion_order.push_back(event.id.clone());
        self.events.insert(event.id.clone(), event.clone());
        PutOutcome {
            inserted: true,
            event,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Event> {
        self.events.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.events.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
