//! Per-PID (table_id, extension) decoder registration on top of a
//! [`Reassembler`]. A filter group's section subscription on a PID owns one
//! `TableDemux`; several decoders can share the PID (e.g. SDT-actual and
//! SDT-other both arrive on 0x11) and each tracks its own delivered version.

use super::reassembler::Reassembler;
use super::section::Section;

/// Whether a decoder wants to keep receiving sections for its
/// (table_id, extension) after this one.
pub enum Continue {
    /// Keep delivering sections to this decoder.
    Yes,
    /// Unregister this decoder; no further sections will be delivered.
    No,
}

/// A table-specific section decoder. Version short-circuiting (skipping a
/// section whose version matches the last one this decoder acted on) is the
/// decoder's own responsibility, not the demux's — per spec.md §4.2.
pub trait Decoder: Send {
    /// Handles one fully reassembled, CRC-valid section for this decoder's
    /// registered (table_id, extension).
    fn on_section(&mut self, section: &Section) -> Continue;
}

struct Registration {
    table_id: u8,
    extension: Option<u16>,
    decoder: Box<dyn Decoder>,
}

/// Reassembles one PID's packets and fans completed sections out to every
/// registered decoder whose (table_id, extension) matches.
#[derive(Default)]
pub struct TableDemux {
    reassembler: Reassembler,
    registrations: Vec<Registration>,
}

impl TableDemux {
    /// Creates an empty demux with no registered decoders.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `decoder` for sections carrying `table_id`. `extension`
    /// narrows the match to one table instance (e.g. one transport_stream_id
    /// for PAT); `None` matches any extension value for that table id.
    pub fn register(&mut self, table_id: u8, extension: Option<u16>, decoder: Box<dyn Decoder>) {
        self.registrations.push(Registration {
            table_id,
            extension,
            decoder,
        });
    }

    /// Feeds one TS packet's payload through the underlying reassembler and
    /// dispatches any resulting sections to matching decoders, dropping
    /// decoders whose `on_section` returns [`Continue::No`].
    pub fn push_packet(&mut self, payload_unit_start: bool, continuity_counter: u8, payload: &[u8]) {
        let sections = self
            .reassembler
            .push_packet(payload_unit_start, continuity_counter, payload);

        for section in &sections {
            let mut drop = Vec::new();
            for (idx, reg) in self.registrations.iter_mut().enumerate() {
                if reg.table_id != section.table_id {
                    continue;
                }
                if let Some(ext) = reg.extension {
                    if ext != section.extension {
                        continue;
                    }
                }
                if matches!(reg.decoder.on_section(section), Continue::No) {
                    drop.push(idx);
                }
            }
            for idx in drop.into_iter().rev() {
                self.registrations.remove(idx);
            }
        }
    }

    /// Protocol-benign failure counters from the underlying reassembler.
    pub fn stats(&self) -> super::reassembler::ReassemblerStats {
        self.reassembler.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingDecoder {
        count: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Decoder for CountingDecoder {
        fn on_section(&mut self, _section: &Section) -> Continue {
            self.count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Continue::Yes
        }
    }

    #[test]
    fn dispatches_only_to_matching_table_id() {
        use crate::psi::crc::Crc32Mpeg2;

        let mut demux = TableDemux::new();
        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        demux.register(
            0x00,
            None,
            Box::new(CountingDecoder {
                count: count.clone(),
            }),
        );

        let mut body = vec![0x00, 0x80, 0x00, 0x00, 0x01, 0xc1, 0x00, 0x00, 0x00, 0x01, 0xe1, 0x00];
        let section_length = body.len() - 3 + 4;
        body[1] = 0x80 | ((section_length >> 8) as u8 & 0x0f);
        body[2] = section_length as u8;
        let crc = Crc32Mpeg2::new().calculate(&body);
        body.extend_from_slice(&crc.to_be_bytes());

        let mut packet = vec![0u8];
        packet.extend_from_slice(&body);
        demux.push_packet(true, 0, &packet);

        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
