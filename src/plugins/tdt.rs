//! Time and Date Table / Time Offset Table processor (spec.md §4.4).
//!
//! Stateless: every TDT/TOT section decodes straight to a Unix timestamp
//! and fires [`Event::TimeReceived`]. No cache interaction, no version
//! tracking — a TDT carries no version_number worth de-duplicating against
//! (short-form sections don't have one; TOT's is ignored here since the
//! decoded value is idempotent to re-deliver).

use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::filter::FilterGroup;
use crate::plugin_loader::{ReaderHooks, TableProcessor};
use crate::psi::tdt::{self, PID_TDT, TABLE_ID_TDT, TABLE_ID_TOT};
use crate::psi::{Continue, Decoder, Section};
use std::sync::Arc;

const SOURCE: &str = "TDTProcessor";

#[derive(Default)]
pub struct TdtProcessor;

impl TableProcessor for TdtProcessor {
    fn name(&self) -> &'static str {
        "tdt"
    }

    fn build(
        &self,
        _cache: Arc<crate::cache::ServiceCache>,
        event_bus: Arc<EventBus>,
        _hooks: ReaderHooks,
    ) -> Result<Arc<FilterGroup>> {
        let group = Arc::new(FilterGroup::new("tdt", "processor"));

        let tdt_decoder = TdtDecoder {
            event_bus: event_bus.clone(),
        };
        group.register_decoder(PID_TDT, TABLE_ID_TDT, None, Box::new(tdt_decoder));

        let tot_decoder = TdtDecoder { event_bus };
        group.register_decoder(PID_TDT, TABLE_ID_TOT, None, Box::new(tot_decoder));

        Ok(group)
    }
}

struct TdtDecoder {
    event_bus: Arc<EventBus>,
}

impl Decoder for TdtDecoder {
    fn on_section(&mut self, section: &Section) -> Continue {
        match tdt::decode(section) {
            Ok(unix_seconds) => {
                self.event_bus.fire(SOURCE, Event::TimeReceived { unix_seconds });
            }
            Err(err) => {
                tracing::warn!(%err, "dropping malformed TDT/TOT section");
            }
        }
        Continue::Yes
    }
}
