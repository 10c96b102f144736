//! # TS Reader
//!
//! Owns the DVB device handle and a dedicated reader thread that pulls
//! packets in bulk and dispatches each to every subscribing filter group.
//! Mirrors `examples/original_source/src/ts.c`'s `TSFilterTSReader` thread
//! operation for operation: bulk read, per-batch registry snapshot,
//! per-packet dispatch, mux-changed flag check, bitrate accounting.
//!
//! Runs on a plain `std::thread`, not a tokio task: the read-dispatch loop
//! is a tight blocking loop that must never run long-running work inline
//! (spec.md §4.1), and mixing a blocking read with the tokio runtime this
//! crate otherwise uses for the store/shell invites starvation of other
//! tasks on that runtime.

use crate::error::{EngineError, Result};
use crate::events::{Event, EventBus};
use crate::filter::{FilterGroup, FilterGroupRegistry, GroupHandle};
use crate::format::ts::{TSPacketParser, TS_PACKET_SIZE};
use crate::tuner::TunerDevice;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const SOURCE: &str = "TSReader";
/// Packets pulled per `read_packets` call, per spec.md §11 operational
/// defaults.
const BATCH_PACKETS: usize = 64;
const READ_TIMEOUT_MS: u64 = 100;

/// Snapshot of the reader's running statistics, exposed to the CLI `status`
/// command.
#[derive(Debug, Clone, Copy, Default)]
pub struct TsReaderStats {
    pub total_packets: u64,
    pub bitrate_bps: u64,
    pub continuity_errors: u64,
}

struct StatsInner {
    total_packets: AtomicU64,
    continuity_errors: AtomicU64,
    window_start: std::sync::Mutex<Instant>,
    window_packets: AtomicU64,
    bitrate_bps: AtomicU64,
}

impl Default for StatsInner {
    fn default() -> Self {
        Self {
            total_packets: AtomicU64::new(0),
            continuity_errors: AtomicU64::new(0),
            window_start: std::sync::Mutex::new(Instant::now()),
            window_packets: AtomicU64::new(0),
            bitrate_bps: AtomicU64::new(0),
        }
    }
}

impl StatsInner {
    fn record_batch(&self, count: usize) {
        self.total_packets.fetch_add(count as u64, Ordering::Relaxed);
        let packets = self.window_packets.fetch_add(count as u64, Ordering::Relaxed) + count as u64;
        let mut window_start = self.window_start.lock().unwrap();
        let elapsed = window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let bits = packets * TS_PACKET_SIZE as u64 * 8;
            let bps = (bits as f64 / elapsed.as_secs_f64()) as u64;
            self.bitrate_bps.store(bps, Ordering::Relaxed);
            self.window_packets.store(0, Ordering::Relaxed);
            *window_start = Instant::now();
        }
    }

    fn snapshot(&self) -> TsReaderStats {
        TsReaderStats {
            total_packets: self.total_packets.load(Ordering::Relaxed),
            bitrate_bps: self.bitrate_bps.load(Ordering::Relaxed),
            continuity_errors: self.continuity_errors.load(Ordering::Relaxed),
        }
    }
}

/// Per-PID continuity-counter tracking, used purely for the reader's own
/// discontinuity stat — independent of any filter group's reassembler,
/// which tracks continuity per (group, pid) on its own.
#[derive(Default)]
struct ContinuityTracker {
    last: std::collections::HashMap<u16, u8>,
}

impl ContinuityTracker {
    fn observe(&mut self, pid: u16, counter: u8, has_payload: bool) -> bool {
        if !has_payload {
            return false;
        }
        let gap = match self.last.insert(pid, counter) {
            Some(prev) => (prev + 1) & 0x0f != counter,
            None => false,
        };
        gap
    }
}

/// Owns the device and the reader thread. One instance per adapter.
pub struct TsReader {
    registry: Arc<FilterGroupRegistry>,
    enabled: Arc<AtomicBool>,
    quit: Arc<AtomicBool>,
    structural_change: Arc<AtomicBool>,
    stats: Arc<StatsInner>,
    thread: Option<JoinHandle<()>>,
}

impl TsReader {
    /// Acquires `device` and starts the reader thread dispatching through
    /// `registry`. Thread-safe filter-group mutation is available
    /// immediately via [`Self::create_filter_group`]/[`Self::destroy_filter_group`].
    pub fn open(
        mut device: Box<dyn TunerDevice>,
        registry: Arc<FilterGroupRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Result<Self> {
        device.open()?;

        let enabled = Arc::new(AtomicBool::new(true));
        let quit = Arc::new(AtomicBool::new(false));
        let structural_change = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(StatsInner::default());

        let thread_registry = registry.clone();
        let thread_enabled = enabled.clone();
        let thread_quit = quit.clone();
        let thread_structural = structural_change.clone();
        let thread_stats = stats.clone();

        let thread = std::thread::Builder::new()
            .name("ts-reader".into())
            .spawn(move || {
                dispatch_loop(
                    device.as_mut(),
                    &thread_registry,
                    &thread_enabled,
                    &thread_quit,
                    &thread_structural,
                    &thread_stats,
                    &event_bus,
                );
            })
            .map_err(|e| EngineError::HardwareFatal(e.to_string()))?;

        Ok(Self {
            registry,
            enabled,
            quit,
            structural_change,
            stats,
            thread: Some(thread),
        })
    }

    /// Registers `group` for dispatch. Thread-safe.
    pub fn create_filter_group(&self, group: Arc<FilterGroup>) -> GroupHandle {
        self.registry.create(group)
    }

    /// Removes a filter group. Blocks (via the registry's write lock) until
    /// the reader has observed the removal, so no in-flight callback for
    /// that group runs after this returns (spec.md §4.1).
    pub fn destroy_filter_group(&self, handle: GroupHandle) {
        self.registry.destroy(handle);
    }

    /// Globally masks dispatch without stopping the thread. Per Open
    /// Question OQ-3, this never clears any group's own `enabled` flag —
    /// both must be true for a packet to reach a group.
    pub fn enable(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Tells the reader to deliver a `MuxChanged` callback to every group
    /// once on its next batch, then clear the flag. Called by the PAT
    /// processor on first-PAT / structural change (spec.md §4.1).
    pub fn mark_structural_change(&self) {
        self.structural_change.store(true, Ordering::Release);
    }

    /// A shareable handle the PAT processor can hold to call
    /// [`Self::mark_structural_change`]-equivalent behavior without owning
    /// the whole reader.
    pub fn structural_change_flag(&self) -> Arc<AtomicBool> {
        self.structural_change.clone()
    }

    /// Current running statistics.
    pub fn stats(&self) -> TsReaderStats {
        self.stats.snapshot()
    }

    /// Signals the reader thread to stop and joins it, releasing the
    /// device.
    pub fn close(mut self) -> Result<()> {
        self.quit.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            handle.join().map_err(|_| EngineError::HardwareFatal("reader thread panicked".into()))?;
        }
        Ok(())
    }
}

fn dispatch_loop(
    device: &mut dyn TunerDevice,
    registry: &FilterGroupRegistry,
    enabled: &AtomicBool,
    quit: &AtomicBool,
    structural_change: &AtomicBool,
    stats: &StatsInner,
    event_bus: &EventBus,
) {
    let parser = TSPacketParser::new();
    let mut continuity = ContinuityTracker::default();
    let mut buf = vec![0u8; BATCH_PACKETS * TS_PACKET_SIZE];

    while !quit.load(Ordering::Acquire) {
        let n = match device.read_packets(&mut buf, READ_TIMEOUT_MS) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(EngineError::HardwareFatal(reason)) => {
                tracing::error!(%reason, "ts reader hardware failure, stopping");
                event_bus.fire(SOURCE, Event::ReaderFailed { reason });
                return;
            }
            Err(err) => {
                tracing::warn!(%err, "ts reader transient read error, retrying");
                continue;
            }
        };

        if !enabled.load(Ordering::Acquire) {
            continue;
        }

        let groups = registry.snapshot();
        let packet_count = n / TS_PACKET_SIZE;
        stats.record_batch(packet_count);

        if structural_change.swap(false, Ordering::AcqRel) {
            for group in &groups {
                group.fire_mux_changed();
            }
        }

        for packet in buf[..n].chunks_exact(TS_PACKET_SIZE) {
            let header = match parser.parse_header(packet) {
                Ok(h) => h,
                Err(_) => continue,
            };

            if continuity.observe(header.pid, header.continuity_counter, header.contains_payload) {
                stats.continuity_errors.fetch_add(1, Ordering::Relaxed);
            }

            let payload_offset = payload_offset(&parser, packet, &header);
            let payload = &packet[payload_offset..];

            for group in &groups {
                if !group.enabled() {
                    continue;
                }
                group.dispatch_packet(header.pid, packet);
                group.dispatch_section(
                    header.pid,
                    header.payload_unit_start,
                    header.continuity_counter,
                    payload,
                );
            }
        }
    }
}

fn payload_offset(
    parser: &TSPacketParser,
    packet: &[u8],
    header: &crate::format::ts::types::TSHeader,
) -> usize {
    const HEADER_SIZE: usize = 4;
    if !header.adaptation_field_exists {
        return HEADER_SIZE;
    }
    match parser.parse_adaptation_field(packet, HEADER_SIZE) {
        Ok(Some(field)) => HEADER_SIZE + 1 + field.length,
        _ => HEADER_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuner::NullTuner;

    #[test]
    fn open_and_close_join_cleanly() {
        let registry = Arc::new(FilterGroupRegistry::new());
        let bus = EventBus::new();
        let reader = TsReader::open(Box::new(NullTuner::default()), registry, bus).unwrap();
        reader.enable(false);
        reader.close().unwrap();
    }
}
