//! Program Map Table processor (spec.md §4.4).
//!
//! Unlike PAT (one PID, always 0x0000) and SDT (one PID, always 0x0011),
//! PMT needs one section subscription per cached service's own `pmt_pid`,
//! rebuilt whenever the PAT processor signals a structural change via
//! [`FilterGroup::fire_mux_changed`]. Capped at [`MAX_MONITORED_SERVICES`]
//! per spec.md §7's resource-exhaustion policy: beyond the cap, extra
//! services are simply left unsubscribed and the condition is logged, not
//! treated as fatal.

use crate::cache::ServiceCache;
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::filter::FilterGroup;
use crate::plugin_loader::{ReaderHooks, TableProcessor};
use crate::psi::{self, Continue, Decoder, Section};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

const SOURCE: &str = "PMTProcessor";

/// Maximum number of services this processor will hold a PMT subscription
/// for at once (spec.md §7, SPEC_FULL.md §11).
pub const MAX_MONITORED_SERVICES: usize = 256;

#[derive(Default)]
pub struct PmtProcessor;

impl TableProcessor for PmtProcessor {
    fn name(&self) -> &'static str {
        "pmt"
    }

    fn build(
        &self,
        cache: Arc<ServiceCache>,
        event_bus: Arc<EventBus>,
        _hooks: ReaderHooks,
    ) -> Result<Arc<FilterGroup>> {
        let group = Arc::new(FilterGroup::new("pmt", "processor"));
        let state = Arc::new(Mutex::new(Subscriptions::default()));

        let weak_group = Arc::downgrade(&group);
        let cb_cache = cache.clone();
        let cb_bus = event_bus.clone();
        let cb_state = state.clone();
        group.set_mux_changed_callback(Box::new(move || {
            if let Some(group) = weak_group.upgrade() {
                rebuild_subscriptions(&group, &cb_cache, &cb_bus, &cb_state);
            }
        }));

        // A mux may already be bound with services cached from a prior run
        // (e.g. restored from the store) before the first structural-change
        // signal arrives; seed subscriptions from whatever is cached now.
        rebuild_subscriptions(&group, &cache, &event_bus, &state);

        Ok(group)
    }
}

#[derive(Default)]
struct Subscriptions {
    pid_to_service: HashMap<u16, u16>,
}

fn rebuild_subscriptions(
    group: &Arc<FilterGroup>,
    cache: &Arc<ServiceCache>,
    event_bus: &Arc<EventBus>,
    state: &Mutex<Subscriptions>,
) {
    let services = cache.services();
    if services.len() > MAX_MONITORED_SERVICES {
        tracing::error!(
            count = services.len(),
            cap = MAX_MONITORED_SERVICES,
            "more services than MAX_MONITORED_SERVICES, truncating PMT subscriptions"
        );
    }

    let mut wanted: HashMap<u16, u16> = HashMap::new();
    for service in services.iter().take(MAX_MONITORED_SERVICES) {
        let pid = service.pmt_pid();
        if pid != 0 {
            wanted.insert(pid, service.service_id);
        }
    }

    let mut subs = state.lock();

    let stale: Vec<u16> = subs
        .pid_to_service
        .iter()
        .filter(|(pid, service_id)| wanted.get(pid) != Some(service_id))
        .map(|(pid, _)| *pid)
        .collect();
    for pid in stale {
        group.unsubscribe_sections(pid);
        subs.pid_to_service.remove(&pid);
    }

    for (&pid, &service_id) in &wanted {
        if subs.pid_to_service.get(&pid) == Some(&service_id) {
            continue;
        }
        if let Some(service) = cache.find_by_id(service_id) {
            let decoder = PmtDecoder {
                cache: cache.clone(),
                event_bus: event_bus.clone(),
                service,
                last_version: None,
            };
            group.register_decoder(pid, psi::TABLE_ID_PMT, Some(service_id), Box::new(decoder));
            subs.pid_to_service.insert(pid, service_id);
        }
    }
}

struct PmtDecoder {
    cache: Arc<ServiceCache>,
    event_bus: Arc<EventBus>,
    service: crate::obj::Shared<crate::cache::Service>,
    last_version: Option<u8>,
}

impl Decoder for PmtDecoder {
    fn on_section(&mut self, section: &Section) -> Continue {
        let pmt = match psi::pmt::decode(section) {
            Ok(pmt) => pmt,
            Err(err) => {
                tracing::warn!(%err, "dropping malformed PMT section");
                return Continue::Yes;
            }
        };

        if self.last_version == Some(pmt.version) {
            return Continue::Yes;
        }
        self.last_version = Some(pmt.version);

        let streams = pmt
            .streams
            .iter()
            .map(|s| crate::cache::StreamEntry {
                pid: s.elementary_pid,
                stream_type: s.stream_type,
                descriptors: s.descriptors.clone(),
            })
            .collect();

        let program_info = crate::cache::ProgramInfo {
            pcr_pid: pmt.pcr_pid,
            program_descriptors: pmt.program_descriptors,
            streams,
        };

        self.cache.update_program_info(&self.service, pmt.version, program_info);
        self.event_bus.fire(
            SOURCE,
            Event::PmtReceived {
                service_id: pmt.program_number,
                version: pmt.version,
            },
        );

        Continue::Yes
    }
}
