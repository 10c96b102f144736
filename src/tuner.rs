//! # Tuner / Hardware Interface
//!
//! The sole seam between this crate and a real DVB adapter. `spec.md`
//! scopes hardware tuning specifics out of the core (§1: "Surrounding
//! collaborators ... DVB-hardware tuner ... are specified only at their
//! interfaces with the core"), so this module defines the trait the reader
//! depends on and ships only the headless implementations a safe-Rust build
//! can run everywhere: [`NullTuner`] (reads nothing, useful for wiring
//! tests) and [`FileTuner`] (replays a captured `.ts` file, useful for
//! integration tests and demos without hardware).

use crate::error::Result;
use std::io::Read;
use std::path::{Path, PathBuf};

/// The hardware seam the [`crate::reader::TsReader`] reads packets through.
/// A real ioctl-based DVB-API adapter would implement this trait; it is
/// out of this crate's core scope per spec.md §1.
pub trait TunerDevice: Send {
    /// Opens the device, tuning to whatever parameters the implementation
    /// was constructed with.
    fn open(&mut self) -> Result<()>;

    /// Reads as many whole 188-byte packets as fit in `buf`, blocking for
    /// up to `timeout_ms`. Returns the number of bytes read (a multiple of
    /// 188); zero means "no data before the timeout", a benign condition
    /// the reader retries, per spec.md §4.1.
    fn read_packets(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize>;

    /// Changes the tuned frequency/delivery parameters. A no-op for
    /// playback-only implementations.
    fn set_frequency(&mut self, tuning_params: &[u8]) -> Result<()>;

    /// Releases the device.
    fn close(&mut self) -> Result<()>;
}

/// A tuner that never produces packets. Used by tests and by a headless
/// engine instance that only needs the reader thread's plumbing, not live
/// data.
#[derive(Debug, Default)]
pub struct NullTuner {
    open: bool,
}

impl TunerDevice for NullTuner {
    fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn read_packets(&mut self, _buf: &mut [u8], timeout_ms: u64) -> Result<usize> {
        std::thread::sleep(std::time::Duration::from_millis(timeout_ms.min(20)));
        Ok(0)
    }

    fn set_frequency(&mut self, _tuning_params: &[u8]) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}

/// Replays a captured transport stream file, looping at EOF. Used in tests
/// and demos in place of a real DVB adapter.
pub struct FileTuner {
    path: PathBuf,
    file: Option<std::fs::File>,
}

impl FileTuner {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
        }
    }
}

impl TunerDevice for FileTuner {
    fn open(&mut self) -> Result<()> {
        self.file = Some(std::fs::File::open(&self.path)?);
        Ok(())
    }

    fn read_packets(&mut self, buf: &mut [u8], _timeout_ms: u64) -> Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| crate::error::EngineError::HardwareFatal("tuner not open".into()))?;
        let n = file.read(buf)?;
        if n == 0 {
            // Loop back to the start so tests can run the reader
            // indefinitely against a short capture.
            *file = std::fs::File::open(&self.path)?;
            return Ok(0);
        }
        // Only return whole packets; a partial tail is held back by
        // leaving the file position where it is and returning 0 this call,
        // so the reader's next read starts mid-packet only if the file
        // itself is malformed.
        Ok(n - (n % 188))
    }

    fn set_frequency(&mut self, _tuning_params: &[u8]) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.file = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_tuner_opens_and_reads_nothing() {
        let mut tuner = NullTuner::default();
        tuner.open().unwrap();
        let mut buf = [0u8; 188];
        assert_eq!(tuner.read_packets(&mut buf, 1).unwrap(), 0);
    }
}
