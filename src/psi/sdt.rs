//! Service Description Table section decoding (ETSI EN 300 468 §5.2.3).
//!
//! Layout grounded in
//! `examples/other_examples/516737ca_toshipp-tstools__src-psi-sdt.rs.rs`'s
//! `ServiceDescriptionSection`/`Service` byte offsets; service/default-
//! authority descriptor text extraction grounded in
//! `examples/other_examples/bfe23c32_dholroyd-en-300-468-reader__src-sdt.rs.rs`.

use super::descriptors::{
    parse_default_authority, parse_descriptors, parse_service_descriptor, ServiceDescriptor,
    TAG_CA, TAG_DEFAULT_AUTHORITY, TAG_SERVICE,
};
use super::section::Section;
use crate::error::{EngineError, Result};

/// SDT carries sections on this PID for both the actual and other
/// transport streams.
pub const PID_SDT: u16 = 0x11;
/// `table_id` for the SDT describing the actual transport stream.
pub const TABLE_ID_SDT_ACTUAL: u8 = 0x42;
/// `table_id` for an SDT describing another transport stream.
pub const TABLE_ID_SDT_OTHER: u8 = 0x46;

/// One service entry from an SDT section.
#[derive(Debug, Clone)]
pub struct SdtService {
    pub service_id: u16,
    pub running_status: u8,
    pub free_ca_mode: bool,
    pub service: Option<ServiceDescriptor>,
    pub default_authority: Option<String>,
}

/// A fully decoded SDT section.
#[derive(Debug, Clone)]
pub struct SdtSection {
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub version: u8,
    pub current_next: bool,
    pub services: Vec<SdtService>,
}

/// Decodes an SDT section's payload. Accepts both SDT-actual (`0x42`) and
/// SDT-other (`0x46`) table ids.
pub fn decode(section: &Section) -> Result<SdtSection> {
    if section.table_id != TABLE_ID_SDT_ACTUAL && section.table_id != TABLE_ID_SDT_OTHER {
        return Err(EngineError::UnknownTableId(section.table_id));
    }
    let data = &section.payload;
    if data.len() < 2 {
        return Err(EngineError::InvalidData("SDT payload too short".into()));
    }
    let original_network_id = ((data[0] as u16) << 8) | data[1] as u16;

    let mut services = Vec::new();
    let mut pos = 3; // byte 2 is reserved_future_use.
    while pos + 5 <= data.len() {
        let service_id = ((data[pos] as u16) << 8) | data[pos + 1] as u16;
        let running_status = data[pos + 3] >> 5;
        let free_ca_mode = (data[pos + 3] >> 4) & 0x01 != 0;
        let descriptors_loop_length =
            ((data[pos + 3] as usize & 0x0f) << 8) | data[pos + 4] as usize;
        pos += 5;
        if pos + descriptors_loop_length > data.len() {
            return Err(EngineError::InvalidData("SDT descriptor loop overruns payload".into()));
        }
        let descriptors = parse_descriptors(&data[pos..pos + descriptors_loop_length])?;
        pos += descriptors_loop_length;

        let service = descriptors
            .iter()
            .find(|d| d.tag == TAG_SERVICE)
            .and_then(|d| parse_service_descriptor(&d.data).ok());
        let default_authority = descriptors
            .iter()
            .find(|d| d.tag == TAG_DEFAULT_AUTHORITY)
            .map(|d| parse_default_authority(&d.data));
        let _ca_descriptor_present = descriptors.iter().any(|d| d.tag == TAG_CA);

        services.push(SdtService {
            service_id,
            running_status,
            free_ca_mode,
            service,
            default_authority,
        });
    }

    Ok(SdtSection {
        transport_stream_id: section.extension,
        original_network_id,
        version: section.version,
        current_next: section.current_next,
        services,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::crc::Crc32Mpeg2;

    fn build_section(tsid: u16, onid: u16, service_id: u16, name: &str, provider: &str) -> Section {
        let mut service_descriptor = vec![0x01u8]; // digital television
        service_descriptor.push(provider.len() as u8);
        service_descriptor.extend_from_slice(provider.as_bytes());
        service_descriptor.push(name.len() as u8);
        service_descriptor.extend_from_slice(name.as_bytes());

        let mut service_loop = vec![
            (service_id >> 8) as u8,
            service_id as u8,
            0x00,
            0xf0 | (((service_descriptor.len() + 2) >> 8) as u8 & 0x0f),
            (service_descriptor.len() + 2) as u8,
            TAG_SERVICE,
            service_descriptor.len() as u8,
        ];
        service_loop.extend_from_slice(&service_descriptor);

        let mut body = vec![
            0x42,
            0x80,
            0x00,
            (tsid >> 8) as u8,
            tsid as u8,
            0xc1,
            0x00,
            0x00,
            (onid >> 8) as u8,
            onid as u8,
            0x00,
        ];
        body.extend_from_slice(&service_loop);

        let section_length = body.len() - 3 + 4;
        body[1] = 0x80 | ((section_length >> 8) as u8 & 0x0f);
        body[2] = section_length as u8;
        let crc = Crc32Mpeg2::new().calculate(&body);
        body.extend_from_slice(&crc.to_be_bytes());
        super::super::section::decode(&body).unwrap()
    }

    #[test]
    fn decodes_service_name_and_provider() {
        let section = build_section(1, 2, 10, "BBC ONE", "BBC");
        let sdt = decode(&section).unwrap();
        assert_eq!(sdt.original_network_id, 2);
        assert_eq!(sdt.services.len(), 1);
        let service = sdt.services[0].service.as_ref().unwrap();
        assert_eq!(service.service_name, "BBC ONE");
        assert_eq!(service.provider_name, "BBC");
    }
}
