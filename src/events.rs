//! # Event Bus
//!
//! Named sources publish named events; listeners subscribe at global,
//! source, or event granularity. Modeled on `original_source/src/events.c`'s
//! `EventsRegisterEventListener` family, with the three listener scopes
//! preserved: a listener registered with no source/event filter sees
//! everything, one registered against a source sees every event that
//! source fires, one registered against a specific `(source, event)` pair
//! sees only that.
//!
//! Listeners run on the firing thread and must not block — the bus makes no
//! attempt to off-load delivery; callers that need to do slow work in
//! response to an event should enqueue it via [`crate::msgq`] from inside
//! their listener.

use parking_lot::RwLock;
use std::sync::Arc;

/// The well-known events this engine fires. Payload is carried out-of-band
/// by the specific event enum rather than as an `Any`, so listeners match
/// on the variant they care about.
#[derive(Debug, Clone)]
pub enum Event {
    /// The reader observed added/removed services between PAT cycles.
    MuxStructureChanged,
    /// A PAT section was fully decoded. Carries the transport_stream_id.
    PatReceived { tsid: u16, version: u8 },
    /// A PMT section was fully decoded for the given service id.
    PmtReceived { service_id: u16, version: u8 },
    /// An SDT section updated service metadata.
    SdtReceived { tsid: u16 },
    /// A TDT/TOT section decoded the current time.
    TimeReceived { unix_seconds: i64 },
    /// The reader thread hit an unrecoverable device error and stopped.
    ReaderFailed { reason: String },
}

/// A named origin of events, e.g. `"PATProcessor"` or `"TSReader"`.
pub type SourceName = &'static str;

type Listener = Box<dyn Fn(SourceName, &Event) + Send + Sync>;

struct ListenerEntry {
    source_filter: Option<SourceName>,
    event_filter: Option<std::mem::Discriminant<Event>>,
    callback: Listener,
}

/// Central dispatcher. One instance is shared (via `Arc`) across the engine.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<ListenerEntry>>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a listener for every event from every source.
    pub fn listen_all<F>(&self, callback: F)
    where
        F: Fn(SourceName, &Event) + Send + Sync + 'static,
    {
        self.listeners.write().push(ListenerEntry {
            source_filter: None,
            event_filter: None,
            callback: Box::new(callback),
        });
    }

    /// Registers a listener for every event from a specific source.
    pub fn listen_source<F>(&self, source: SourceName, callback: F)
    where
        F: Fn(SourceName, &Event) + Send + Sync + 'static,
    {
        self.listeners.write().push(ListenerEntry {
            source_filter: Some(source),
            event_filter: None,
            callback: Box::new(callback),
        });
    }

    /// Registers a listener for one specific `(source, event variant)` pair.
    /// The `template` value is only used to pick out its discriminant; its
    /// payload is ignored.
    pub fn listen_event<F>(&self, source: SourceName, template: &Event, callback: F)
    where
        F: Fn(SourceName, &Event) + Send + Sync + 'static,
    {
        self.listeners.write().push(ListenerEntry {
            source_filter: Some(source),
            event_filter: Some(std::mem::discriminant(template)),
            callback: Box::new(callback),
        });
    }

    /// Fires `event` as having originated from `source`, synchronously
    /// invoking every matching listener on the calling thread.
    pub fn fire(&self, source: SourceName, event: Event) {
        let listeners = self.listeners.read();
        for entry in listeners.iter() {
            if let Some(src) = entry.source_filter {
                if src != source {
                    continue;
                }
            }
            if let Some(discr) = entry.event_filter {
                if discr != std::mem::discriminant(&event) {
                    continue;
                }
            }
            (entry.callback)(source, &event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn global_listener_sees_everything() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.listen_all(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.fire("PATProcessor", Event::MuxStructureChanged);
        bus.fire("SDTProcessor", Event::TimeReceived { unix_seconds: 0 });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn source_scoped_listener_filters() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.listen_source("PATProcessor", move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.fire("PATProcessor", Event::MuxStructureChanged);
        bus.fire("SDTProcessor", Event::MuxStructureChanged);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn event_scoped_listener_filters_on_variant() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.listen_event(
            "PATProcessor",
            &Event::PatReceived { tsid: 0, version: 0 },
            move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
            },
        );
        bus.fire("PATProcessor", Event::PatReceived { tsid: 1, version: 2 });
        bus.fire("PATProcessor", Event::MuxStructureChanged);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
