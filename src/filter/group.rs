//! A single named filter group: a PID-keyed set of packet callbacks plus a
//! PID-keyed set of section demuxers, together with its own enabled flag
//! (per Open Question OQ-3: dispatch requires both the registry's global
//! enable and this group's own enable).

use crate::psi::{Continue, Decoder, TableDemux};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Invoked once per packet for a PID this group subscribes to at the
/// packet level (as opposed to the section level).
pub type PacketCallback = Box<dyn Fn(u16, &[u8]) + Send + Sync>;

/// Invoked once when the reader observes a structural change in the
/// current multiplex (services added/removed between PAT versions).
pub type MuxChangedCallback = Box<dyn Fn() + Send + Sync>;

/// A dynamic subscription unit: operators add/remove whole groups; a group
/// adds/removes its own PID subscriptions at runtime without needing the
/// registry's write lock (subscriptions live behind the group's own
/// `Mutex`es, which dispatch only ever needs read access to the registry
/// vector to reach).
pub struct FilterGroup {
    name: String,
    type_tag: String,
    enabled: AtomicBool,
    packet_subs: Mutex<HashMap<u16, PacketCallback>>,
    section_subs: Mutex<HashMap<u16, TableDemux>>,
    on_mux_changed: Mutex<Option<MuxChangedCallback>>,
    user_arg: Option<Box<dyn std::any::Any + Send + Sync>>,
}

impl FilterGroup {
    /// Creates a new, enabled filter group with no opaque user argument.
    pub fn new(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self::with_arg(name, type_tag, None)
    }

    /// Creates a new, enabled filter group carrying an opaque user argument,
    /// handed back to the owning plugin/output via [`FilterGroup::user_arg`]
    /// the way the source's `TSFilterGroup.userArg` does.
    pub fn with_arg(
        name: impl Into<String>,
        type_tag: impl Into<String>,
        user_arg: Option<Box<dyn std::any::Any + Send + Sync>>,
    ) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.into(),
            enabled: AtomicBool::new(true),
            packet_subs: Mutex::new(HashMap::new()),
            section_subs: Mutex::new(HashMap::new()),
            on_mux_changed: Mutex::new(None),
            user_arg,
        }
    }

    /// The opaque argument this group was created with, if any.
    pub fn user_arg(&self) -> Option<&(dyn std::any::Any + Send + Sync)> {
        self.user_arg.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Per-group enable; combined with the registry's global enable by the
    /// reader's dispatch loop.
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Registers (replacing any previous) the callback fired when the
    /// reader detects a structural change in the current multiplex.
    pub fn set_mux_changed_callback(&self, callback: MuxChangedCallback) {
        *self.on_mux_changed.lock() = Some(callback);
    }

    pub(crate) fn fire_mux_changed(&self) {
        if let Some(cb) = self.on_mux_changed.lock().as_ref() {
            cb();
        }
    }

    /// Subscribes to packets on `pid` at the packet level.
    pub fn subscribe_packets(&self, pid: u16, callback: PacketCallback) {
        self.packet_subs.lock().insert(pid, callback);
    }

    pub fn unsubscribe_packets(&self, pid: u16) {
        self.packet_subs.lock().remove(&pid);
    }

    /// Registers a table decoder for `pid`, creating the PID's section
    /// demux on first use.
    pub fn register_decoder(
        &self,
        pid: u16,
        table_id: u8,
        extension: Option<u16>,
        decoder: Box<dyn Decoder>,
    ) {
        self.section_subs
            .lock()
            .entry(pid)
            .or_default()
            .register(table_id, extension, decoder);
    }

    pub fn unsubscribe_sections(&self, pid: u16) {
        self.section_subs.lock().remove(&pid);
    }

    /// Every PID this group currently has a packet subscription for.
    pub fn packet_pids(&self) -> Vec<u16> {
        self.packet_subs.lock().keys().copied().collect()
    }

    /// Every PID this group currently has a section subscription for.
    pub fn section_pids(&self) -> Vec<u16> {
        self.section_subs.lock().keys().copied().collect()
    }

    /// Delivers one packet on `pid` to this group's packet callback, if
    /// subscribed. Called by the reader's dispatch loop for every matching
    /// group, in arrival order per PID.
    pub fn dispatch_packet(&self, pid: u16, packet: &[u8]) {
        if let Some(callback) = self.packet_subs.lock().get(&pid) {
            callback(pid, packet);
        }
    }

    /// Feeds one packet's payload into this group's section demux for
    /// `pid`, if subscribed.
    pub fn dispatch_section(
        &self,
        pid: u16,
        payload_unit_start: bool,
        continuity_counter: u8,
        payload: &[u8],
    ) {
        if let Some(demux) = self.section_subs.lock().get_mut(&pid) {
            demux.push_packet(payload_unit_start, continuity_counter, payload);
        }
    }
}

/// Adapts a plain closure into a [`Decoder`] — most of this engine's table
/// processors only need "run this on every section", not the ability to
/// unregister themselves.
pub struct FnDecoder<F: FnMut(&crate::psi::Section) + Send>(pub F);

impl<F: FnMut(&crate::psi::Section) + Send> Decoder for FnDecoder<F> {
    fn on_section(&mut self, section: &crate::psi::Section) -> Continue {
        (self.0)(section);
        Continue::Yes
    }
}
