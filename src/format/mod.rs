//! # Transport-Level Formats
//!
//! Currently holds the MPEG-2 Transport Stream packet and section format.
//! Kept as its own module (rather than folding into `psi`) because it is
//! the layer the reader and the service filter both depend on, while `psi`
//! depends on it.

/// MPEG Transport Stream (TS) packet header, adaptation field, and legacy
/// PAT/PMT byte-level decoders.
pub mod ts;
