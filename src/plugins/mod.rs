//! # Standard Table Processors
//!
//! The four/five plugin types spec.md §4.4 names, one module each,
//! implementing [`crate::plugin_loader::TableProcessor`]. Each owns exactly
//! one [`crate::filter::FilterGroup`] and registers its own decoders
//! against it; none talk to each other directly — all coordination runs
//! through the shared [`crate::cache::ServiceCache`] and
//! [`crate::events::EventBus`].

/// Program Association Table processor.
pub mod pat;
/// Program Map Table processor.
pub mod pmt;
/// ATSC Virtual Channel Table processor.
pub mod psip;
/// Service Description Table processor.
pub mod sdt;
/// Time and Date Table / Time Offset Table processor.
pub mod tdt;
