//! Delayed product releases ordered by execution time.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::membrane::MembraneId;
use crate::species::StoichiometrySpecies;

/// Key for ordering events in the queue.
///
/// Events are ordered by:
/// 1. Time (earlier first)
/// 2. Sequence number (FIFO for equal times)
#[derive(Debug, Clone, Copy)]
struct EventKey {
    time: f64,
    sequence: u64,
}

impl Ord for EventKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then(self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for EventKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for EventKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EventKey {}

/// Products of a delayed reaction, waiting to be added to their membrane.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingEvent {
    pub reaction: usize,
    pub membrane: MembraneId,
    pub products: Vec<StoichiometrySpecies>,
}

#[derive(Clone, Debug, Default)]
pub struct EventQueue {
    events: BTreeMap<EventKey, PendingEvent>,
    next_sequence: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `event` at absolute time `time` (seconds).
    pub fn push(&mut self, time: f64, event: PendingEvent) {
        let key = EventKey {
            time,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.events.insert(key, event);
    }

    pub fn peek_time(&self) -> Option<f64> {
        self.events.first_key_value().map(|(key, _)| key.time)
    }

    pub fn pop(&mut self) -> Option<(f64, PendingEvent)> {
        self.events.pop_first().map(|(key, event)| (key.time, event))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Pending events in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &PendingEvent)> {
        self.events.iter().map(|(key, event)| (key.time, event))
    }
}
