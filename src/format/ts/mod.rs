//! # MPEG Transport Stream (TS) Packet Format
//!
//! Packet-level and legacy whole-section decoding for MPEG-2 Transport
//! Streams: the 4-byte TS header, the adaptation field, and simple PAT/PMT
//! byte layouts used by the synthesised-output rewriter in `servicefilter`.
//! Incremental reassembly of sections arriving split across several TS
//! packets lives in `psi::reassembler`, one layer up.

/// Low-level TS packet header and adaptation field parsing.
pub mod parser;

/// Core TS types and constants (PAT/PMT byte layout, descriptors, PCR math).
pub mod types;

pub use parser::TSPacketParser;
pub use types::{
    AdaptationField, Descriptor, ElementaryStreamInfo, PATEntry, TSHeader, PAT, PMT,
    PID_PAT, PID_PMT, STREAM_TYPE_AAC, STREAM_TYPE_H264, STREAM_TYPE_H265, TS_HEADER_SIZE,
    TS_PACKET_SIZE,
};
