//! # Delivery Method Registry
//!
//! An output sink is named by an MRL (`scheme://...`); the registry hands
//! the MRL to every registered [`DeliveryMethodHandler`] in registration
//! order and uses the first one whose `can_handle` returns `true`, exactly
//! matching `original_source/src/deliverymethod.c`'s
//! `DeliveryMethodManagerRegister`/`DeliveryMethodCreate` first-match-wins
//! scan.

/// `file://` handler — appends raw packet bytes to a local file.
pub mod file;
/// `null://` handler — discards every packet, useful for dry runs/tests.
pub mod null;
/// `udp://host:port` handler — batches packets into MTU-sized datagrams.
pub mod udp;

use crate::error::{EngineError, Result};

/// A sink that accepts whole 188-byte TS packets, batching internally as
/// it sees fit (spec.md §4.6).
///
/// `reserve_header_space`/`set_header`/`output_block` are the hooks
/// spec.md §4.6 names for a protocol header that prefixes every datagram
/// (e.g. RTP) and for section-level sinks; no concrete handler in this
/// crate needs them (the Non-goals exclude any control/framing protocol
/// beyond the line shell), so the defaults are no-ops rather than
/// `unimplemented!` — a third-party `DeliveryMethod` is free to override
/// them.
pub trait DeliveryMethod: Send + Sync {
    /// The MRL this instance was created for.
    fn mrl(&self) -> &str;

    /// Reserves `n` bytes at the front of every future datagram for a
    /// protocol header this instance will prefix itself. No-op by default.
    fn reserve_header_space(&self, _n: usize) {}

    /// Supplies (or replaces) the header bytes reserved by
    /// `reserve_header_space`, called once per session. No-op by default.
    fn set_header(&self, _packets: &[u8], _n: usize) {}

    /// Accepts one packet for delivery. Implementations that batch (UDP)
    /// buffer internally and flush once a full batch accumulates.
    fn send_packet(&self, packet: &[u8; 188]) -> Result<()>;

    /// Accepts a complete section-level blob (as opposed to a TS packet)
    /// for sinks that forward PSI/SI sections directly rather than
    /// repacketised TS. Unsupported by default — this crate's standard
    /// handlers are all packet-level sinks.
    fn output_block(&self, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Flushes any partially filled batch. Called on output teardown so a
    /// trailing partial datagram isn't silently lost.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Constructs a [`DeliveryMethod`] from an MRL, or `None` if nothing
/// handles its scheme.
pub trait DeliveryMethodHandler: Send + Sync {
    /// Whether this handler recognises `mrl`'s scheme.
    fn can_handle(&self, mrl: &str) -> bool;

    /// Builds an instance bound to `mrl`. Only called after `can_handle`
    /// returned `true` for the same MRL.
    fn create(&self, mrl: &str) -> Result<Box<dyn DeliveryMethod>>;
}

/// First-match-wins registry of delivery method handlers.
pub struct Registry {
    handlers: Vec<Box<dyn DeliveryMethodHandler>>,
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self { handlers: Vec::new() };
        registry.register(Box::new(null::NullHandler));
        registry.register(Box::new(udp::UdpHandler));
        registry.register(Box::new(file::FileHandler));
        registry
    }
}

impl Registry {
    /// An empty registry with none of the standard handlers installed.
    pub fn empty() -> Self {
        Self { handlers: Vec::new() }
    }

    /// The standard registry: null, udp, file, in that scan order.
    pub fn standard() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Box<dyn DeliveryMethodHandler>) {
        self.handlers.push(handler);
    }

    /// Scans registered handlers in order and creates an instance from the
    /// first one that recognises `mrl`'s scheme.
    pub fn create(&self, mrl: &str) -> Result<Box<dyn DeliveryMethod>> {
        for handler in &self.handlers {
            if handler.can_handle(mrl) {
                return handler.create(mrl);
            }
        }
        Err(EngineError::DeliverySchemeUnknown(mrl.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_scheme_is_rejected() {
        let registry = Registry::standard();
        assert!(registry.create("rtp://239.1.1.1:1234").is_err());
    }

    #[test]
    fn null_scheme_resolves() {
        let registry = Registry::standard();
        let method = registry.create("null://").unwrap();
        assert_eq!(method.mrl(), "null://");
        method.send_packet(&[0u8; 188]).unwrap();
    }
}
