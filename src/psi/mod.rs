//! # PSI/SI Table Processing
//!
//! Section reassembly and table-specific decoders for the tables this
//! engine understands: PAT, PMT, SDT (DVB), and TDT/TOT. Generalizes
//! vdkio's `format::ts::parser` (which only ever decoded a whole,
//! already-assembled PAT/PMT buffer) into the pointer-field-aware
//! incremental reassembly spec.md §4.2 requires, plus the additional
//! tables a receiver needs beyond PAT/PMT.

/// MPEG-2 CRC32 used to validate reassembled sections.
pub mod crc;
/// Descriptor TLV parsing/encoding, shared by PMT and SDT.
pub mod descriptors;
/// Program Association Table decoding.
pub mod pat;
/// Program Map Table decoding.
pub mod pmt;
/// ATSC Virtual Channel Table decoding.
pub mod psip;
/// Per-PID section reassembly.
pub mod reassembler;
/// Service Description Table decoding.
pub mod sdt;
/// A single reassembled section.
pub mod section;
/// `stream_type` classification.
pub mod stream_type;
/// Per-(table_id, extension) decoder registration on top of a reassembler.
pub mod table_demux;
/// Time and Date Table / Time Offset Table decoding.
pub mod tdt;

pub use reassembler::{Reassembler, ReassemblerStats};
pub use section::Section;
pub use stream_type::{classify_with_descriptors, StreamType};
pub use table_demux::{Continue, Decoder, TableDemux};

/// `table_id` for the Program Association Table.
pub const TABLE_ID_PAT: u8 = 0x00;
/// `table_id` for the Program Map Table.
pub const TABLE_ID_PMT: u8 = 0x02;
/// PID the Program Association Table is always carried on.
pub const PID_PAT: u16 = 0x0000;
