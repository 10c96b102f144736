//! # Plugin Loader
//!
//! Registration seam for table processors (§4.4): a static
//! `Vec<Box<dyn TableProcessor>>` built once at `Engine::new` time, not a
//! `dlopen`-style dynamic loader — a safe-Rust build has no business
//! loading foreign code at runtime. Third-party processors can participate
//! the same way the standard ones do, by implementing [`TableProcessor`]
//! and being pushed onto the same list.

use crate::cache::ServiceCache;
use crate::error::Result;
use crate::events::EventBus;
use crate::filter::{FilterGroup, FilterGroupRegistry, GroupHandle};
use crate::reader::TsReader;
use std::sync::Arc;

/// A standard or third-party table processor, installed once against a
/// [`TsReader`] and torn down once when the engine shuts down.
pub trait TableProcessor: Send + Sync {
    /// Stable name, used for logging.
    fn name(&self) -> &'static str;

    /// Builds this processor's filter group, subscribes its PIDs/tables,
    /// and returns the group for the loader to register with the reader.
    fn build(
        &self,
        cache: Arc<ServiceCache>,
        event_bus: Arc<EventBus>,
        reader_hooks: ReaderHooks,
    ) -> Result<Arc<FilterGroup>>;
}

/// The subset of [`TsReader`] a table processor needs at build time, handed
/// in by value so processors never need to hold the reader itself (only the
/// PAT processor uses this, to flag structural changes on first PAT).
#[derive(Clone)]
pub struct ReaderHooks {
    pub structural_change: Arc<std::sync::atomic::AtomicBool>,
}

impl ReaderHooks {
    pub fn from_reader(reader: &TsReader) -> Self {
        Self {
            structural_change: reader.structural_change_flag(),
        }
    }
}

/// The standard plugin set this crate ships, in PAT-before-PMT-before-SDT
/// order: the PAT processor must see sections before the PMT processor can
/// usefully subscribe to the PIDs PAT names.
pub fn standard_processors() -> Vec<Box<dyn TableProcessor>> {
    vec![
        Box::new(crate::plugins::pat::PatProcessor::default()),
        Box::new(crate::plugins::pmt::PmtProcessor::default()),
        Box::new(crate::plugins::sdt::SdtProcessor::default()),
        Box::new(crate::plugins::psip::PsipProcessor::default()),
        Box::new(crate::plugins::tdt::TdtProcessor::default()),
    ]
}

/// Every filter group handle the loader created, so the engine can tear
/// them down cleanly at shutdown.
pub struct InstalledPlugins {
    registry: Arc<FilterGroupRegistry>,
    handles: Vec<GroupHandle>,
}

impl InstalledPlugins {
    /// Builds and registers every processor in `processors`, in order.
    pub fn install(
        processors: Vec<Box<dyn TableProcessor>>,
        reader: &TsReader,
        registry: Arc<FilterGroupRegistry>,
        cache: Arc<ServiceCache>,
        event_bus: Arc<EventBus>,
    ) -> Result<Self> {
        let hooks = ReaderHooks::from_reader(reader);
        let mut handles = Vec::with_capacity(processors.len());
        for processor in &processors {
            let group = processor.build(cache.clone(), event_bus.clone(), hooks.clone())?;
            tracing::info!(plugin = processor.name(), "table processor installed");
            handles.push(reader.create_filter_group(group));
        }
        Ok(Self { registry, handles })
    }

    /// Installs the standard plugin set.
    pub fn install_standard(
        reader: &TsReader,
        registry: Arc<FilterGroupRegistry>,
        cache: Arc<ServiceCache>,
        event_bus: Arc<EventBus>,
    ) -> Result<Self> {
        Self::install(standard_processors(), reader, registry, cache, event_bus)
    }

    /// Tears down every installed processor's filter group.
    pub fn shutdown(self) {
        for handle in self.handles {
            self.registry.destroy(handle);
        }
    }
}
