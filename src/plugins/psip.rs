//! ATSC Virtual Channel Table processor (spec.md §4.4).
//!
//! Plays the same metadata-only role SDT plays for DVB: maps a VCT channel
//! entry onto a cached service by `program_number` (ATSC's PAT-equivalent
//! identifier, which this cache treats the same as DVB's `service_id`) and
//! pushes the channel's short name as the service name. No DVB provider,
//! free-CA-mode, or default-authority analogue exists in a VCT entry, so
//! those fields are left untouched here.

use crate::cache::ServiceCache;
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::filter::FilterGroup;
use crate::plugin_loader::{ReaderHooks, TableProcessor};
use crate::psi::psip::{self, PID_PSIP, TABLE_ID_CVCT, TABLE_ID_TVCT};
use crate::psi::{Continue, Decoder, Section};
use std::sync::Arc;

const SOURCE: &str = "PSIPProcessor";

#[derive(Default)]
pub struct PsipProcessor;

impl TableProcessor for PsipProcessor {
    fn name(&self) -> &'static str {
        "psip"
    }

    fn build(
        &self,
        cache: Arc<ServiceCache>,
        event_bus: Arc<EventBus>,
        _hooks: ReaderHooks,
    ) -> Result<Arc<FilterGroup>> {
        let group = Arc::new(FilterGroup::new("psip", "processor"));

        let tvct = VctDecoder {
            cache: cache.clone(),
            event_bus: event_bus.clone(),
            last_version: None,
        };
        group.register_decoder(PID_PSIP, TABLE_ID_TVCT, None, Box::new(tvct));

        let cvct = VctDecoder {
            cache,
            event_bus,
            last_version: None,
        };
        group.register_decoder(PID_PSIP, TABLE_ID_CVCT, None, Box::new(cvct));

        Ok(group)
    }
}

struct VctDecoder {
    cache: Arc<ServiceCache>,
    event_bus: Arc<EventBus>,
    last_version: Option<u8>,
}

impl Decoder for VctDecoder {
    fn on_section(&mut self, section: &Section) -> Continue {
        let vct = match psip::decode(section) {
            Ok(vct) => vct,
            Err(err) => {
                tracing::warn!(%err, "dropping malformed VCT section");
                return Continue::Yes;
            }
        };

        if self.last_version == Some(vct.version) {
            return Continue::Yes;
        }
        self.last_version = Some(vct.version);

        let mut listed = std::collections::HashSet::new();
        for channel in &vct.channels {
            listed.insert(channel.program_number);
            let service = self
                .cache
                .find_by_id(channel.program_number)
                .unwrap_or_else(|| self.cache.add(channel.program_number, 0));
            self.cache.update_service_name(&service, &channel.short_name);
            self.cache.seen(&service, true, false);
        }

        for service in self.cache.services() {
            if !listed.contains(&service.service_id) {
                self.cache.seen(&service, false, false);
            }
        }

        self.event_bus.fire(
            SOURCE,
            Event::SdtReceived {
                tsid: vct.transport_stream_id,
            },
        );

        Continue::Yes
    }
}
