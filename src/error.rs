//! # Error Types
//!
//! Central error type for the engine. Protocol-benign failures (bad CRC,
//! continuity gaps, unknown table ids) are never constructed as a path out of
//! the dispatch loop — they are counted and logged at the point of
//! detection. `EngineError` exists for failures that a caller needs to
//! observe: I/O, persistence, configuration, and malformed input that a
//! higher layer chose to propagate rather than swallow.
//!
//! ## Example Usage
//!
//! ```rust
//! use dvbengine::error::{EngineError, Result};
//!
//! fn process_section(data: &[u8]) -> Result<()> {
//!     if data.is_empty() {
//!         return Err(EngineError::InvalidData("empty section".to_string()));
//!     }
//!     Ok(())
//! }
//! ```

use std::num::ParseIntError;
use thiserror::Error;

/// Primary error type for the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// I/O errors from device reads, file sinks, or the store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors surfaced by the persistent store.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Errors from running store migrations.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Errors that occur during parsing of PSI/SI sections or TS packets.
    #[error("parser error: {0}")]
    Parser(String),

    /// Errors for invalid or malformed input data.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A section carried a table id this engine has no decoder for.
    #[error("unknown table id: 0x{0:02x}")]
    UnknownTableId(u8),

    /// The DVB device disappeared or access was denied; the reader thread
    /// has terminated and must be restarted by the operator.
    #[error("hardware fatal: {0}")]
    HardwareFatal(String),

    /// A configuration value was missing, malformed, or contradictory.
    #[error("configuration error: {0}")]
    Config(String),

    /// An output or filter-group name collided with an existing one.
    #[error("name collision: {0}")]
    NameCollision(String),

    /// An MRL's scheme had no registered delivery-method handler.
    #[error("unknown delivery scheme: {0}")]
    DeliverySchemeUnknown(String),

    /// A limit documented in the spec (e.g. monitored-service count) was hit.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Errors that occur during integer parsing (channels.conf, MRLs, ...).
    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),

    /// Errors parsing a socket address (UDP MRLs).
    #[error("address error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
}

/// A specialized Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error kind surfaced to an operator through the command shell.
///
/// Distinct from [`EngineError`] so that internal variants (store SQL
/// errors, parser internals) don't leak verbatim into command output; the
/// shell maps an [`EngineError`] onto one of these kinds plus a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandErrorKind {
    /// The command name or arguments were not understood.
    BadSyntax,
    /// A named output, service, or multiplex did not exist.
    NotFound,
    /// The requested name was already in use.
    Collision,
    /// The MRL or delivery scheme was not recognised.
    BadMrl,
    /// Any other failure reaching the engine (store, I/O, ...).
    Internal,
}

/// Error returned to an operator by a shell command.
#[derive(Error, Debug)]
#[error("{kind:?}: {message}")]
pub struct CommandError {
    /// Coarse classification of the failure, for scripts that branch on it.
    pub kind: CommandErrorKind,
    /// Human-readable explanation.
    pub message: String,
}

impl CommandError {
    /// Builds a command error of the given kind with a message.
    pub fn new(kind: CommandErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<EngineError> for CommandError {
    fn from(err: EngineError) -> Self {
        let kind = match &err {
            EngineError::NameCollision(_) => CommandErrorKind::Collision,
            EngineError::DeliverySchemeUnknown(_) => CommandErrorKind::BadMrl,
            EngineError::Config(_) => CommandErrorKind::BadSyntax,
            _ => CommandErrorKind::Internal,
        };
        CommandError::new(kind, err.to_string())
    }
}
