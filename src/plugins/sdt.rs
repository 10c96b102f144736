//! Service Description Table processor (spec.md §4.4).
//!
//! PID 0x11, table ids 0x42 (actual TS) and 0x46 (other TS) both route
//! through the same decoder: service metadata (name, provider, type,
//! CA-mode, default authority) is applied to the matching cached service
//! regardless of which table id carried it, and `original_network_id` is
//! pushed to the bound multiplex — the one field PAT never carries.

use crate::cache::{ServiceCache, ServiceKind};
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::filter::FilterGroup;
use crate::plugin_loader::{ReaderHooks, TableProcessor};
use crate::psi::sdt::{self, TABLE_ID_SDT_ACTUAL, TABLE_ID_SDT_OTHER};
use crate::psi::{Continue, Decoder, Section};
use std::sync::Arc;

const SOURCE: &str = "SDTProcessor";

#[derive(Default)]
pub struct SdtProcessor;

impl TableProcessor for SdtProcessor {
    fn name(&self) -> &'static str {
        "sdt"
    }

    fn build(
        &self,
        cache: Arc<ServiceCache>,
        event_bus: Arc<EventBus>,
        _hooks: ReaderHooks,
    ) -> Result<Arc<FilterGroup>> {
        let group = Arc::new(FilterGroup::new("sdt", "processor"));

        // SDT-actual and SDT-other share PID 0x11; a separate decoder
        // instance per table id tracks each table's own version
        // independently, since `TableDemux` dispatches by (table_id,
        // extension) but both decoders live on the same PID's demux.
        let decoder_actual = SdtDecoder {
            cache: cache.clone(),
            event_bus: event_bus.clone(),
            last_version: None,
        };
        group.register_decoder(sdt::PID_SDT, TABLE_ID_SDT_ACTUAL, None, Box::new(decoder_actual));

        let decoder_other = SdtDecoder {
            cache,
            event_bus,
            last_version: None,
        };
        group.register_decoder(sdt::PID_SDT, TABLE_ID_SDT_OTHER, None, Box::new(decoder_other));

        Ok(group)
    }
}

struct SdtDecoder {
    cache: Arc<ServiceCache>,
    event_bus: Arc<EventBus>,
    last_version: Option<u8>,
}

impl Decoder for SdtDecoder {
    fn on_section(&mut self, section: &Section) -> Continue {
        let table = match sdt::decode(section) {
            Ok(table) => table,
            Err(err) => {
                tracing::warn!(%err, "dropping malformed SDT section");
                return Continue::Yes;
            }
        };

        if self.last_version == Some(table.version) {
            return Continue::Yes;
        }
        self.last_version = Some(table.version);

        self.cache.update_multiplex_onid(table.original_network_id);

        let mut listed = std::collections::HashSet::new();
        for entry in &table.services {
            listed.insert(entry.service_id);
            let service = self
                .cache
                .find_by_id(entry.service_id)
                .unwrap_or_else(|| self.cache.add(entry.service_id, 0));

            if let Some(descriptor) = &entry.service {
                self.cache.update_service_name(&service, &descriptor.service_name);
                self.cache.update_service_provider(&service, &descriptor.provider_name);
                self.cache
                    .update_service_type(&service, ServiceKind::from(descriptor.service_type));
            }
            self.cache.update_service_ca(&service, entry.free_ca_mode);
            if let Some(authority) = &entry.default_authority {
                self.cache.update_service_default_authority(&service, authority);
            }
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
                tsid: table.transport_stream_id,
            },
        );

        Continue::Yes
    }
}
