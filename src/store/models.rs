//! Row types for the persistent store. Kept deliberately flat — this module
//! is the only place that names SQL column names, per Design Note DN-4.

use sqlx::FromRow;

/// A persisted multiplex row.
#[derive(Debug, Clone, FromRow)]
pub struct MultiplexRow {
    pub uid: i64,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub tsid: i64,
    pub netid: i64,
    pub pat_version: i64,
    pub tuningparams: Vec<u8>,
}

/// A persisted service row.
#[derive(Debug, Clone, FromRow)]
pub struct ServiceRow {
    pub multiplexuid: i64,
    pub id: i64,
    pub source: i64,
    pub ca: i64,
    #[sqlx(rename = "type")]
    pub kind: i64,
    pub name: String,
    pub provider: String,
    pub defauthority: String,
    pub pmtpid: i64,
    pub pmtversion: i64,
    pub pcrpid: i64,
}

/// A persisted PID row. `pid` may be a real elementary PID or one of the
/// synthetic markers `0x2001` (pmt-pid) / `0x8000|pcr` (pcr-pid).
#[derive(Debug, Clone, FromRow)]
pub struct PidRow {
    pub multiplexuid: i64,
    pub serviceid: i64,
    pub pid: i64,
    #[sqlx(rename = "type")]
    pub kind: i64,
    pub subtype: i64,
    pub pmtversion: i64,
    pub descriptors: Vec<u8>,
}

/// Synthetic PID row marker for a service's pmt-pid.
pub const PID_MARKER_PMT: i64 = 0x2001;
/// Base for the synthetic PID row marker encoding a service's pcr-pid.
pub const PID_MARKER_PCR_BASE: i64 = 0x8000;
