//! A single reassembled, CRC-validated PSI/SI section.

use super::crc::Crc32Mpeg2;
use crate::error::{EngineError, Result};

/// A complete PSI/SI section, as handed from the reassembler to a decoder.
///
/// `payload` holds only the bytes between the 8-byte long-form header and
/// the trailing CRC — table decoders never see the header or CRC bytes.
#[derive(Debug, Clone)]
pub struct Section {
    /// Table identifier (byte 0).
    pub table_id: u8,
    /// `true` if this section uses the long-form header (extension, version,
    /// section numbering, CRC). TDT sections do not.
    pub long_form: bool,
    /// 16-bit discriminator: transport_stream_id for PAT/SDT, program_number
    /// for PMT. Zero for short-form sections.
    pub extension: u16,
    /// 5-bit version number.
    pub version: u8,
    /// current_next_indicator.
    pub current_next: bool,
    pub section_number: u8,
    pub last_section_number: u8,
    /// Bytes strictly between the header and the CRC (or, for short-form
    /// sections, everything after byte 3).
    pub payload: Vec<u8>,
    /// CRC32 as carried on the wire; zero for short-form sections.
    pub crc: u32,
}

/// Decodes one section from a buffer holding exactly `3 + section_length`
/// bytes (the reassembler only calls this once it has accumulated that
/// many). Returns `Err` on a structural problem or CRC mismatch; the
/// reassembler treats both as "drop and count", never propagating the error
/// further per the protocol-benign error policy.
pub fn decode(buf: &[u8]) -> Result<Section> {
    if buf.len() < 3 {
        return Err(EngineError::InvalidData("section shorter than header".into()));
    }
    let table_id = buf[0];
    let section_syntax_indicator = buf[1] & 0x80 != 0;

    if !section_syntax_indicator {
        return Ok(Section {
            table_id,
            long_form: false,
            extension: 0,
            version: 0,
            current_next: true,
            section_number: 0,
            last_section_number: 0,
            payload: buf[3..].to_vec(),
            crc: 0,
        });
    }

    if buf.len() < 11 {
        return Err(EngineError::InvalidData("long-form section shorter than header".into()));
    }
    let extension = ((buf[3] as u16) << 8) | buf[4] as u16;
    let version = (buf[5] >> 1) & 0x1f;
    let current_next = buf[5] & 0x01 != 0;
    let section_number = buf[6];
    let last_section_number = buf[7];

    let crc_offset = buf.len() - 4;
    let crc = u32::from_be_bytes([
        buf[crc_offset],
        buf[crc_offset + 1],
        buf[crc_offset + 2],
        buf[crc_offset + 3],
    ]);

    let calculator = Crc32Mpeg2::new();
    let calculated = calculator.calculate(&buf[..crc_offset]);
    if calculated != crc {
        return Err(EngineError::InvalidData(format!(
            "CRC mismatch: table 0x{table_id:02x} wire=0x{crc:08x} calculated=0x{calculated:08x}"
        )));
    }

    Ok(Section {
        table_id,
        long_form: true,
        extension,
        version,
        current_next,
        section_number,
        last_section_number,
        payload: buf[8..crc_offset].to_vec(),
        crc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_crc(mut bytes: Vec<u8>) -> Vec<u8> {
        let calculator = Crc32Mpeg2::new();
        let crc = calculator.calculate(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());
        bytes
    }

    #[test]
    fn decodes_well_formed_long_form_section() {
        let mut bytes = vec![
            0x00, // table id (PAT)
            0x80, 0x0d, // section_syntax=1, section_length=13
            0x00, 0x01, // extension (tsid)
            0xc1, // version 0, current_next=1
            0x00, 0x00, // section_number, last_section_number
            0x00, 0x01, // program_number 1
            0xe1, 0x00, // pmt pid 0x100
        ];
        bytes = with_crc(bytes);
        let section = decode(&bytes).unwrap();
        assert_eq!(section.table_id, 0x00);
        assert_eq!(section.extension, 1);
        assert_eq!(section.payload, vec![0x00, 0x01, 0xe1, 0x00]);
    }

    #[test]
    fn rejects_bad_crc() {
        let mut bytes = vec![
            0x00, 0x80, 0x0d, 0x00, 0x01, 0xc1, 0x00, 0x00, 0x00, 0x01, 0xe1, 0x00,
        ];
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        assert!(decode(&bytes).is_err());
    }
}
