//! # Engine
//!
//! Wires the TS reader, service cache, installed table processors, and the
//! delivery registry into one runnable process, and owns the operator's set
//! of named outputs (spec.md §3: name, kind ∈ {Manual, Service}, embedded
//! filter group, embedded delivery-method instance). Roughly the Rust shape
//! of `original_source/trunk/src/main.c`'s `Output_t outputs[MAX_OUTPUTS]`
//! plus its `AddOutput`/`RemoveOutput`, generalized behind one
//! `parking_lot::Mutex<Vec<Output>>` instead of a fixed-size array.
//!
//! Outputs themselves are session state, not persisted entities — spec.md §3
//! names `Service`/`Multiplex`/`Event`/`Section` as the records with defined
//! ownership and lifecycle; an `Output` exists only while this process runs.

use crate::cache::{Multiplex, Service, ServiceCache};
use crate::delivery::{self, DeliveryMethod};
use crate::error::{EngineError, Result};
use crate::events::EventBus;
use crate::filter::{FilterGroup, FilterGroupRegistry, GroupHandle, PacketCallback};
use crate::obj::{Shared, Uid};
use crate::plugin_loader::InstalledPlugins;
use crate::reader::{TsReader, TsReaderStats};
use crate::servicefilter::ServiceFilter;
use crate::store::Store;
use crate::tuner::TunerDevice;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// What an [`Output`] forwards.
pub enum OutputKind {
    /// An explicit, operator-chosen set of PIDs, forwarded verbatim.
    Manual { pids: Vec<u16> },
    /// One cached service's elementary streams, with a synthesised PAT/PMT
    /// rewritten onto the output's own PAT/PMT PIDs (spec.md §4.5).
    Service {
        service: Shared<Service>,
        avs_only: bool,
        filter: Arc<ServiceFilter>,
    },
}

/// One operator-configured output.
pub struct Output {
    name: String,
    kind: OutputKind,
    group: Arc<FilterGroup>,
    delivery: Arc<dyn DeliveryMethod>,
    handle: GroupHandle,
}

impl Output {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mrl(&self) -> &str {
        self.delivery.mrl()
    }

    pub fn is_service(&self) -> bool {
        matches!(self.kind, OutputKind::Service { .. })
    }

    pub fn service_name(&self) -> Option<String> {
        match &self.kind {
            OutputKind::Service { service, .. } => Some(service.name()),
            OutputKind::Manual { .. } => None,
        }
    }

    pub fn avs_only(&self) -> bool {
        matches!(self.kind, OutputKind::Service { avs_only: true, .. })
    }

    /// The PIDs this output currently forwards, for the `outputpids` shell
    /// command.
    pub fn pids(&self) -> Vec<u16> {
        match &self.kind {
            OutputKind::Manual { pids } => pids.clone(),
            OutputKind::Service { service, .. } => service
                .program_info()
                .map(|info| {
                    let mut pids: Vec<u16> = info.streams.iter().map(|s| s.pid).collect();
                    if info.pcr_pid != 0 {
                        pids.push(info.pcr_pid);
                    }
                    pids
                })
                .unwrap_or_default(),
        }
    }
}

/// Default tick the output-rewrite thread wakes at when told to stop, so
/// `shutdown` never blocks longer than one tick past the configured cadence.
const MIN_REWRITE_CADENCE_MS: u64 = 1;

/// Ties a [`TsReader`], [`ServiceCache`], the standard table processors, and
/// the delivery registry together into one runnable process.
pub struct Engine {
    reader: TsReader,
    registry: Arc<FilterGroupRegistry>,
    cache: Arc<ServiceCache>,
    event_bus: Arc<EventBus>,
    delivery_registry: delivery::Registry,
    plugins: Option<InstalledPlugins>,
    outputs: Arc<Mutex<Vec<Output>>>,
    quit: Arc<AtomicBool>,
    rewrite_thread: Option<JoinHandle<()>>,
}

impl Engine {
    /// Opens `device`, binds the cache to a multiplex identified by
    /// `multiplex_uid` (loading any services the store already has for it),
    /// installs the standard table processors, and starts the output-rewrite
    /// ticker at `rewrite_cadence_ms` (spec.md §11 default: 400ms).
    pub async fn new(
        device: Box<dyn TunerDevice>,
        store: Arc<Store>,
        multiplex_uid: Uid,
        rewrite_cadence_ms: u64,
    ) -> Result<Self> {
        let registry = Arc::new(FilterGroupRegistry::new());
        let event_bus = EventBus::new();
        let cache = Arc::new(ServiceCache::new(store));
        cache.load(Multiplex::new(multiplex_uid, Vec::new())).await?;

        let reader = TsReader::open(device, registry.clone(), event_bus.clone())?;
        let plugins =
            InstalledPlugins::install_standard(&reader, registry.clone(), cache.clone(), event_bus.clone())?;

        let outputs: Arc<Mutex<Vec<Output>>> = Arc::new(Mutex::new(Vec::new()));
        let quit = Arc::new(AtomicBool::new(false));
        let cadence = Duration::from_millis(rewrite_cadence_ms.max(MIN_REWRITE_CADENCE_MS));

        let rewrite_outputs = outputs.clone();
        let rewrite_quit = quit.clone();
        let rewrite_thread = std::thread::Builder::new()
            .name("output-rewrite".into())
            .spawn(move || rewrite_loop(cadence, &rewrite_outputs, &rewrite_quit))
            .map_err(|e| EngineError::HardwareFatal(e.to_string()))?;

        Ok(Self {
            reader,
            registry,
            cache,
            event_bus,
            delivery_registry: delivery::Registry::standard(),
            plugins: Some(plugins),
            outputs,
            quit,
            rewrite_thread: Some(rewrite_thread),
        })
    }

    pub fn cache(&self) -> &Arc<ServiceCache> {
        &self.cache
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn reader_stats(&self) -> TsReaderStats {
        self.reader.stats()
    }

    pub fn enable_reader(&self, enabled: bool) {
        self.reader.enable(enabled);
    }

    /// Names of every currently configured output, in creation order.
    pub fn output_names(&self) -> Vec<String> {
        self.outputs.lock().iter().map(|o| o.name().to_string()).collect()
    }

    /// Runs `f` against the named output, if it exists.
    pub fn with_output<R>(&self, name: &str, f: impl FnOnce(&Output) -> R) -> Option<R> {
        self.outputs.lock().iter().find(|o| o.name() == name).map(f)
    }

    fn check_name_free(&self, name: &str) -> Result<()> {
        if self.outputs.lock().iter().any(|o| o.name() == name) {
            return Err(EngineError::NameCollision(name.to_string()));
        }
        Ok(())
    }

    /// Adds a manual output forwarding exactly `pids` to `mrl`.
    pub fn add_manual_output(&self, name: impl Into<String>, mrl: &str, pids: Vec<u16>) -> Result<()> {
        let name = name.into();
        self.check_name_free(&name)?;

        let delivery: Arc<dyn DeliveryMethod> = Arc::from(self.delivery_registry.create(mrl)?);
        let group = Arc::new(FilterGroup::new(format!("output:{name}"), "output"));
        for pid in &pids {
            group.subscribe_packets(*pid, forwarding_callback(delivery.clone()));
        }
        let handle = self.reader.create_filter_group(group.clone());

        self.outputs.lock().push(Output {
            name,
            kind: OutputKind::Manual { pids },
            group,
            delivery,
            handle,
        });
        Ok(())
    }

    /// Adds an output that forwards `service_name`'s current streams, with
    /// synthesised PAT/PMT. Errors if the service doesn't exist, the name is
    /// already taken, or the engine is already at its configured
    /// `max_monitored_services` limit.
    pub async fn add_service_output(
        &self,
        name: impl Into<String>,
        mrl: &str,
        service_name: &str,
        avs_only: bool,
    ) -> Result<()> {
        let name = name.into();
        self.check_name_free(&name)?;

        let limit = crate::config::get().max_monitored_services;
        if self.outputs.lock().iter().filter(|o| o.is_service()).count() >= limit {
            return Err(EngineError::ResourceExhausted(format!(
                "max_monitored_services ({limit}) reached"
            )));
        }

        let service = self
            .cache
            .find_by_name(service_name)
            .await?
            .ok_or_else(|| EngineError::InvalidData(format!("no such service: {service_name}")))?;

        let delivery: Arc<dyn DeliveryMethod> = Arc::from(self.delivery_registry.create(mrl)?);
        let sink = delivery.clone();
        let filter = ServiceFilter::new(
            name.clone(),
            service.clone(),
            avs_only,
            Box::new(move |packet| {
                if let Err(err) = sink.send_packet(packet) {
                    tracing::warn!(%err, "delivery failed, dropping packet");
                }
            }),
        );
        let group = filter.packet_group();
        let handle = self.reader.create_filter_group(group.clone());

        self.outputs.lock().push(Output {
            name,
            kind: OutputKind::Service { service, avs_only, filter },
            group,
            delivery,
            handle,
        });
        Ok(())
    }

    /// Removes a previously added output, tearing down its filter group and
    /// flushing its delivery method.
    pub fn remove_output(&self, name: &str) -> Result<()> {
        let output = {
            let mut outputs = self.outputs.lock();
            let pos = outputs
                .iter()
                .position(|o| o.name() == name)
                .ok_or_else(|| EngineError::InvalidData(format!("no such output: {name}")))?;
            outputs.remove(pos)
        };
        self.registry.destroy(output.handle);
        if let Err(err) = output.delivery.flush() {
            tracing::warn!(%err, "flush failed while removing output {name}");
        }
        Ok(())
    }

    /// Adds `pid` to a manual output's forwarded set. Errors for a service
    /// output — its PID set follows the service's PMT, not manual edits.
    pub fn add_pid(&self, name: &str, pid: u16) -> Result<()> {
        let mut outputs = self.outputs.lock();
        let output = outputs
            .iter_mut()
            .find(|o| o.name() == name)
            .ok_or_else(|| EngineError::InvalidData(format!("no such output: {name}")))?;
        match &mut output.kind {
            OutputKind::Manual { pids } => {
                if !pids.contains(&pid) {
                    pids.push(pid);
                }
            }
            OutputKind::Service { .. } => {
                return Err(EngineError::InvalidData("cannot add a PID to a service output".into()));
            }
        }
        output.group.subscribe_packets(pid, forwarding_callback(output.delivery.clone()));
        Ok(())
    }

    /// Removes `pid` from a manual output's forwarded set.
    pub fn remove_pid(&self, name: &str, pid: u16) -> Result<()> {
        let mut outputs = self.outputs.lock();
        let output = outputs
            .iter_mut()
            .find(|o| o.name() == name)
            .ok_or_else(|| EngineError::InvalidData(format!("no such output: {name}")))?;
        match &mut output.kind {
            OutputKind::Manual { pids } => pids.retain(|p| *p != pid),
            OutputKind::Service { .. } => {
                return Err(EngineError::InvalidData("cannot remove a PID from a service output".into()));
            }
        }
        output.group.unsubscribe_packets(pid);
        Ok(())
    }

    /// Persists every pending cache change to the store.
    pub async fn writeback(&self) -> Result<()> {
        self.cache.writeback().await
    }

    /// Stops the reader, the rewrite ticker, and every table processor, in
    /// that order, then releases the device.
    pub fn shutdown(self) -> Result<()> {
        self.quit.store(true, Ordering::Release);
        if let Some(handle) = self.rewrite_thread {
            let _ = handle.join();
        }
        if let Some(plugins) = self.plugins {
            plugins.shutdown();
        }
        for output in self.outputs.lock().drain(..) {
            self.registry.destroy(output.handle);
        }
        self.reader.close()
    }
}

fn forwarding_callback(delivery: Arc<dyn DeliveryMethod>) -> PacketCallback {
    Box::new(move |_pid, packet| {
        if let Ok(array) = <[u8; 188]>::try_from(packet) {
            if let Err(err) = delivery.send_packet(&array) {
                tracing::warn!(%err, "delivery failed, dropping packet");
            }
        }
    })
}

fn rewrite_loop(cadence: Duration, outputs: &Mutex<Vec<Output>>, quit: &AtomicBool) {
    while !quit.load(Ordering::Acquire) {
        std::thread::sleep(cadence);
        if quit.load(Ordering::Acquire) {
            break;
        }
        let filters: Vec<Arc<ServiceFilter>> = outputs
            .lock()
            .iter()
            .filter_map(|o| match &o.kind {
                OutputKind::Service { filter, .. } => Some(filter.clone()),
                OutputKind::Manual { .. } => None,
            })
            .collect();
        for filter in filters {
            filter.rewrite();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuner::NullTuner;

    async fn test_engine() -> Engine {
        let store = Arc::new(Store::connect_in_memory().await.unwrap());
        Engine::new(Box::new(NullTuner::default()), store, 1, 50).await.unwrap()
    }

    #[tokio::test]
    async fn manual_output_add_remove_roundtrip() {
        let engine = test_engine().await;
        engine.add_manual_output("out1", "null://", vec![0x100, 0x101]).unwrap();
        assert_eq!(engine.output_names(), vec!["out1".to_string()]);
        assert_eq!(engine.with_output("out1", |o| o.pids()).unwrap(), vec![0x100, 0x101]);
        engine.remove_output("out1").unwrap();
        assert!(engine.output_names().is_empty());
    }

    #[tokio::test]
    async fn duplicate_output_name_is_rejected() {
        let engine = test_engine().await;
        engine.add_manual_output("out1", "null://", vec![]).unwrap();
        assert!(engine.add_manual_output("out1", "null://", vec![]).is_err());
    }

    #[tokio::test]
    async fn service_output_for_unknown_service_fails() {
        let engine = test_engine().await;
        assert!(engine.add_service_output("out1", "null://", "nope", false).await.is_err());
    }

    #[tokio::test]
    async fn addpid_on_manual_output_updates_forwarded_set() {
        let engine = test_engine().await;
        engine.add_manual_output("out1", "null://", vec![0x100]).unwrap();
        engine.add_pid("out1", 0x200).unwrap();
        assert_eq!(engine.with_output("out1", |o| o.pids()).unwrap(), vec![0x100, 0x200]);
        engine.remove_pid("out1", 0x100).unwrap();
        assert_eq!(engine.with_output("out1", |o| o.pids()).unwrap(), vec![0x200]);
    }

    #[tokio::test]
    async fn shutdown_joins_cleanly() {
        let engine = test_engine().await;
        engine.add_manual_output("out1", "null://", vec![0x100]).unwrap();
        engine.shutdown().unwrap();
    }
}
