//! `file://path` — appends raw packet bytes to a local file.
//!
//! No batching: every packet is written (and the file flushed) as it
//! arrives, since a local file has no MTU to respect. The file is opened
//! once, in append mode, at handler creation time and kept open for the
//! life of the output.

use super::{DeliveryMethod, DeliveryMethodHandler};
use crate::error::Result;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;

pub const PREFIX: &str = "file://";

pub struct FileHandler;

impl DeliveryMethodHandler for FileHandler {
    fn can_handle(&self, mrl: &str) -> bool {
        mrl.starts_with(PREFIX)
    }

    fn create(&self, mrl: &str) -> Result<Box<dyn DeliveryMethod>> {
        let path = mrl.strip_prefix(PREFIX).unwrap_or(mrl);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Box::new(FileOutput {
            mrl: mrl.to_string(),
            file: Mutex::new(file),
        }))
    }
}

struct FileOutput {
    mrl: String,
    file: Mutex<File>,
}

impl DeliveryMethod for FileOutput {
    fn mrl(&self) -> &str {
        &self.mrl
    }

    fn send_packet(&self, packet: &[u8; 188]) -> Result<()> {
        self.file.lock().write_all(packet)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.file.lock().flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn writes_packets_in_order_and_appends_across_instances() {
        let dir = std::env::temp_dir().join(format!("dvbengine-file-test-{}", std::process::id()));
        let path = dir.to_string_lossy().into_owned();
        let _ = std::fs::remove_file(&path);

        let handler = FileHandler;
        let mrl = format!("file://{path}");
        {
            let output = handler.create(&mrl).unwrap();
            output.send_packet(&[0x47u8; 188]).unwrap();
            output.flush().unwrap();
        }
        {
            let output = handler.create(&mrl).unwrap();
            output.send_packet(&[0x11u8; 188]).unwrap();
            output.flush().unwrap();
        }

        let mut contents = Vec::new();
        File::open(&path).unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(contents.len(), 376);
        assert_eq!(contents[0], 0x47);
        assert_eq!(contents[188], 0x11);

        let _ = std::fs::remove_file(&path);
    }
}
