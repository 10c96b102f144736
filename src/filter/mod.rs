//! # Filter-Group Registry
//!
//! The dynamic collection of named `(type, pid -> packet callback, pid ->
//! section demux)` entries the reader dispatch loop walks every batch.
//! Groups are the unit of subscription: operators add/remove whole groups,
//! and each group adds/removes its own PID subscriptions at runtime.
//! `parking_lot::RwLock` gives the "many concurrent dispatch reads,
//! infrequent operator writes" semantics spec.md §5 calls for, matching how
//! vdkio's `format::rtsp::connection` already reaches for `parking_lot`
//! rather than `std::sync` for its shared state.

mod group;
mod registry;

pub use group::{FilterGroup, PacketCallback};
pub use registry::{FilterGroupRegistry, GroupHandle};
