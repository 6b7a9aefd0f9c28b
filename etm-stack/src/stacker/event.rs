//! Call/return events produced by the stack reconstruction

use std::cell::Cell;
use std::rc::Rc;

use crate::domain::Timestamp;

/// Whether an event opens or closes a duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Call,
    Return,
}

impl EventKind {
    #[must_use]
    pub fn is_call(self) -> bool {
        self == EventKind::Call
    }
}

/// A flushed event with its final timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub name: String,
    pub timestamp: Timestamp,
}

impl Event {
    pub fn call(name: impl Into<String>, timestamp: u64) -> Self {
        Self {
            kind: EventKind::Call,
            name: name.into(),
            timestamp: Timestamp(timestamp),
        }
    }

    pub fn ret(name: impl Into<String>, timestamp: u64) -> Self {
        Self {
            kind: EventKind::Return,
            name: name.into(),
            timestamp: Timestamp(timestamp),
        }
    }
}

/// An event queued inside a stacker
///
/// Its timestamp may still be unknown. The same allocation is referenced from
/// the pending queue and from the waiting list, so resolving it through the
/// waiting list updates the queued entry in place.
#[derive(Debug)]
pub(crate) struct Pending {
    kind: EventKind,
    name: String,
    timestamp: Cell<Option<Timestamp>>,
}

impl Pending {
    pub(crate) fn new(kind: EventKind, name: String, timestamp: Option<Timestamp>) -> Rc<Self> {
        Rc::new(Self {
            kind,
            name,
            timestamp: Cell::new(timestamp),
        })
    }

    pub(crate) fn is_call(&self) -> bool {
        self.kind.is_call()
    }

    pub(crate) fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp.get()
    }

    pub(crate) fn resolve(&self, timestamp: Timestamp) {
        self.timestamp.set(Some(timestamp));
    }

    /// The finished event, if the timestamp is known by now
    pub(crate) fn to_event(&self) -> Option<Event> {
        self.timestamp().map(|timestamp| Event {
            kind: self.kind,
            name: self.name.clone(),
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_is_shared() {
        let queued = Pending::new(EventKind::Call, "main".to_string(), None);
        let waiting = Rc::clone(&queued);
        assert_eq!(queued.to_event(), None);

        waiting.resolve(Timestamp(5));
        assert_eq!(queued.to_event(), Some(Event::call("main", 5)));
    }
}
