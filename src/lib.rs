#![deny(rustdoc::missing_crate_level_docs)]

//! # dvbengine
//!
//! `dvbengine` is a toolkit for building MPEG-2 Transport Stream / DVB-SI
//! packet-dispatch services in Rust: it tunes a device (or replays a
//! captured file), demuxes TS packets by PID, reassembles and validates
//! PSI/SI sections, keeps a live cache of the multiplex's services, and
//! re-delivers selected PIDs — optionally rewritten into a synthetic
//! single-service PAT/PMT — to `null://`/`udp://`/`file://` outputs.
//!
//! ## Module Overview
//!
//! - [`reader`]: tuner-driving dispatch loop; reads TS packets in bulk and
//!   fans them out to registered filter groups.
//! - [`filter`]: filter-group registry — named `(type, PID → callback)`
//!   subscription sets that `reader` dispatches into.
//! - [`psi`]: section reassembly, CRC validation, and decoders for PAT,
//!   PMT, SDT, ATSC PSIP (VCT), and TDT/TOT.
//! - [`plugins`]: [`plugin_loader::TableProcessor`] implementations that
//!   wire the `psi` decoders to a [`cache::ServiceCache`] and
//!   [`events::EventBus`].
//! - [`cache`]: in-RAM snapshot of multiplex/service state with dirty-bit
//!   tracking and write-back to [`store`].
//! - [`store`]: `sqlx`-backed SQLite persistence for the cache.
//! - [`servicefilter`]: per-output PID selection plus synthetic PAT/PMT
//!   rewriting for single-service delivery.
//! - [`delivery`]: MRL-scheme-based output sink registry (`null://`,
//!   `udp://`, `file://`).
//! - [`engine`]: wires reader, cache, plugins, and outputs into one
//!   runnable process.
//! - [`shell`]: interactive operator command console.
//! - [`channels`]: VDR-style `channels.conf` importer for seeding the
//!   cache/store ahead of a first tune.
//! - [`config`]: layered file/env configuration.
//! - [`error`]: crate-wide error types.
//! - [`logging`]: `tracing` subscriber setup.
//! - [`events`]: pub/sub event bus for cross-module notifications.
//! - [`msgq`]: single-worker deferred-job queue.
//! - [`obj`]: small shared-ownership/id helpers (`Shared<T>`, `Uid`).
//! - [`tuner`]: tuner device abstraction plus null/file-replay
//!   implementations.
//! - [`lnb`]: LNB frequency tables and transponder-to-IF math, used by
//!   `channels` when importing DVB-S entries.
//! - [`format`]: legacy TS packet/PAT/PMT encoding types reused by
//!   [`servicefilter`]'s rewrite path.

/// In-RAM service/multiplex cache with write-back persistence.
pub mod cache;

/// VDR-style `channels.conf` importer.
pub mod channels;

/// Layered configuration (file + environment).
pub mod config;

/// Output sink registry (`null://`, `udp://`, `file://`).
pub mod delivery;

/// Wires the reader, cache, plugins, and outputs into a runnable engine.
pub mod engine;

/// Crate-wide error types.
pub mod error;

/// Cross-module pub/sub event bus.
pub mod events;

/// Filter-group registry that the reader dispatches packets into.
pub mod filter;

/// Legacy TS packet/PAT/PMT encoding types, reused by `servicefilter`.
pub mod format;

/// LNB frequency tables and transponder-to-intermediate-frequency math.
pub mod lnb;

/// `tracing` subscriber setup.
pub mod logging;

/// Single-worker deferred-job queue.
pub mod msgq;

/// Shared-ownership and id helpers.
pub mod obj;

/// Standard [`plugin_loader::TableProcessor`] implementations (PAT, PMT,
/// SDT, PSIP, TDT).
pub mod plugins;

/// Table-processor trait and installer.
pub mod plugin_loader;

/// PSI/SI section reassembly and table decoders.
pub mod psi;

/// Tuner-driving packet dispatch loop.
pub mod reader;

/// Per-output PID selection and synthetic PAT/PMT rewriting.
pub mod servicefilter;

/// Interactive operator command console.
pub mod shell;

/// `sqlx`-backed SQLite persistence for the service cache.
pub mod store;

/// Tuner device abstraction plus null/file-replay implementations.
pub mod tuner;

pub use error::{EngineError, Result};
