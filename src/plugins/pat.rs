//! Program Association Table processor (spec.md §4.4).
//!
//! Mirrors `original_source/src/patprocessor.c`'s `PATProcessor`: on every
//! new PAT version, walks the program list, adds/updates a cached service
//! per `program_number != 0` entry (program_number 0 names the NIT PID, not
//! a service), marks every cached service not present this cycle as
//! PAT-unseen via [`ServiceCache::seen`], and flags a structural change on
//! the very first PAT or whenever a service was added or removed.

use crate::cache::ServiceCache;
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::filter::FilterGroup;
use crate::plugin_loader::{ReaderHooks, TableProcessor};
use crate::psi::{self, Continue, Decoder, Section};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const SOURCE: &str = "PATProcessor";

/// `program_number` 0 names the NIT PID rather than a service's PMT PID.
const NIT_PROGRAM_NUMBER: u16 = 0;

#[derive(Default)]
pub struct PatProcessor;

impl TableProcessor for PatProcessor {
    fn name(&self) -> &'static str {
        "pat"
    }

    fn build(
        &self,
        cache: Arc<ServiceCache>,
        event_bus: Arc<EventBus>,
        hooks: ReaderHooks,
    ) -> Result<Arc<FilterGroup>> {
        let group = Arc::new(FilterGroup::new("pat", "processor"));
        let decoder = PatDecoder {
            cache,
            event_bus,
            structural_change: hooks.structural_change,
            last_version: None,
        };
        group.register_decoder(psi::PID_PAT, psi::TABLE_ID_PAT, None, Box::new(decoder));
        Ok(group)
    }
}

struct PatDecoder {
    cache: Arc<ServiceCache>,
    event_bus: Arc<EventBus>,
    structural_change: Arc<AtomicBool>,
    last_version: Option<u8>,
}

impl Decoder for PatDecoder {
    fn on_section(&mut self, section: &Section) -> Continue {
        let pat = match psi::pat::decode(section) {
            Ok(pat) => pat,
            Err(err) => {
                tracing::warn!(%err, "dropping malformed PAT section");
                return Continue::Yes;
            }
        };

        if self.last_version == Some(pat.version) {
            return Continue::Yes;
        }

        let mux = self.cache.current_multiplex();
        let mut structural = mux.as_ref().map(|m| m.is_first_pat()).unwrap_or(true);

        let mut listed = std::collections::HashSet::new();
        for entry in &pat.entries {
            if entry.program_number == NIT_PROGRAM_NUMBER {
                continue;
            }
            listed.insert(entry.program_number);

            let service = match self.cache.find_by_id(entry.program_number) {
                Some(service) => service,
                None => {
                    structural = true;
                    self.cache.add(entry.program_number, 0)
                }
            };
            self.cache.update_service_pmt_pid(&service, entry.pid);
            self.cache.seen(&service, true, true);
        }

        for service in self.cache.services() {
            if !listed.contains(&service.service_id) && !self.cache.seen(&service, false, true) {
                structural = true;
            }
        }

        self.cache.update_multiplex(pat.version, pat.transport_stream_id, None);
        self.last_version = Some(pat.version);

        if structural {
            self.structural_change.store(true, Ordering::Release);
        }

        self.event_bus.fire(
            SOURCE,
            Event::PatReceived {
                tsid: pat.transport_stream_id,
                version: pat.version,
            },
        );

        Continue::Yes
    }
}
