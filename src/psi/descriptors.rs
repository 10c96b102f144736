//! Generic TLV descriptor parsing shared by PMT/SDT and the persistent
//! store's `PIDs.descriptors` column, and the service/default-authority
//! descriptors SDT needs.

use crate::error::{EngineError, Result};
use crate::format::ts::types::Descriptor;

/// Service-descriptor tag (ETSI EN 300 468 §6.2.33).
pub const TAG_SERVICE: u8 = 0x48;
/// Default-authority descriptor tag (ETSI EN 300 468 §6.2.9).
pub const TAG_DEFAULT_AUTHORITY: u8 = 0x5f;
/// CA (conditional access) descriptor tag (ISO/IEC 13818-1 §2.6.16).
pub const TAG_CA: u8 = 0x09;
/// Component descriptor tag (ETSI EN 300 468 §6.2.8): a program-level
/// descriptor that references one elementary stream by `component_tag`.
pub const TAG_COMPONENT: u8 = 0x50;
/// Stream identifier descriptor tag (ETSI EN 300 468 §6.2.39): carried in an
/// elementary stream's own descriptor loop, giving that stream's
/// `component_tag` so program-level descriptors (like the component
/// descriptor above) can refer back to it.
pub const TAG_STREAM_IDENTIFIER: u8 = 0x52;

/// Reads the `component_tag` a stream identifier descriptor (tag `0x52`)
/// assigns to the elementary stream carrying it, if any.
pub fn component_tag_of(descriptors: &[Descriptor]) -> Option<u8> {
    descriptors
        .iter()
        .find(|d| d.tag == TAG_STREAM_IDENTIFIER)
        .and_then(|d| d.data.first().copied())
}

/// Drops component descriptors (tag `0x50`) from a program descriptor loop
/// whose `component_tag` doesn't match any of `kept_component_tags` —
/// descriptors that referenced streams filtered out of the multiplex no
/// longer apply. Non-component descriptors pass through unchanged.
pub fn retain_component_descriptors(descriptors: &[Descriptor], kept_component_tags: &[u8]) -> Vec<Descriptor> {
    descriptors
        .iter()
        .filter(|d| {
            if d.tag != TAG_COMPONENT {
                return true;
            }
            match d.data.get(2) {
                Some(component_tag) => kept_component_tags.contains(component_tag),
                None => false,
            }
        })
        .cloned()
        .collect()
}

/// Parses a `tag, length, data` TLV sequence into a descriptor list.
/// Verbatim preservation: callers that only need to pass descriptors
/// through (PMT's program/ES descriptor loops) keep the raw bytes in
/// [`Descriptor::data`] rather than re-deriving them.
pub fn parse_descriptors(data: &[u8]) -> Result<Vec<Descriptor>> {
    let mut descriptors = Vec::new();
    let mut pos = 0;
    while pos + 2 <= data.len() {
        let tag = data[pos];
        let length = data[pos + 1] as usize;
        pos += 2;
        if pos + length > data.len() {
            return Err(EngineError::InvalidData("descriptor data too short".into()));
        }
        descriptors.push(Descriptor {
            tag,
            data: data[pos..pos + length].to_vec(),
        });
        pos += length;
    }
    Ok(descriptors)
}

/// Rolls a descriptor list back up into its wire TLV form, as persisted in
/// the store's `PIDs.descriptors` BLOB column.
pub fn encode_descriptors(descriptors: &[Descriptor]) -> Vec<u8> {
    let mut buf = Vec::new();
    for d in descriptors {
        buf.push(d.tag);
        buf.push(d.data.len() as u8);
        buf.extend_from_slice(&d.data);
    }
    buf
}

/// Decoded service descriptor (tag `0x48`): service type, provider name,
/// and service name, all DVB length-prefixed strings.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub service_type: u8,
    pub provider_name: String,
    pub service_name: String,
}

/// Parses a service descriptor's payload (the bytes after tag/length).
pub fn parse_service_descriptor(data: &[u8]) -> Result<ServiceDescriptor> {
    if data.is_empty() {
        return Err(EngineError::InvalidData("empty service descriptor".into()));
    }
    let service_type = data[0];
    let provider_len = *data
        .get(1)
        .ok_or_else(|| EngineError::InvalidData("truncated service descriptor".into()))?
        as usize;
    let provider_start = 2;
    let provider_end = provider_start + provider_len;
    if provider_end > data.len() {
        return Err(EngineError::InvalidData("provider name overruns descriptor".into()));
    }
    let provider_name = decode_dvb_text(&data[provider_start..provider_end]);

    let name_len_pos = provider_end;
    let name_len = *data
        .get(name_len_pos)
        .ok_or_else(|| EngineError::InvalidData("truncated service descriptor".into()))?
        as usize;
    let name_start = name_len_pos + 1;
    let name_end = name_start + name_len;
    if name_end > data.len() {
        return Err(EngineError::InvalidData("service name overruns descriptor".into()));
    }
    let service_name = decode_dvb_text(&data[name_start..name_end]);

    Ok(ServiceDescriptor {
        service_type,
        provider_name,
        service_name,
    })
}

/// Parses a default-authority descriptor's payload into a URI byte string.
pub fn parse_default_authority(data: &[u8]) -> String {
    decode_dvb_text(data)
}

/// Decodes a DVB string. A leading byte in `0x01..=0x1f` selects a
/// non-default character table; unsupported tables fall back to lossy
/// Latin-1/UTF-8 on the remaining bytes rather than failing the whole
/// section, since descriptor text is advisory metadata.
fn decode_dvb_text(data: &[u8]) -> String {
    let bytes = if let Some(&first) = data.first() {
        if (0x01..=0x1f).contains(&first) {
            &data[1..]
        } else {
            data
        }
    } else {
        data
    };
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_encode_and_parse() {
        let original = vec![
            Descriptor {
                tag: 0x09,
                data: vec![0x01, 0x02],
            },
            Descriptor {
                tag: 0x48,
                data: vec![0x01, 0x00, 0x00],
            },
        ];
        let encoded = encode_descriptors(&original);
        let decoded = parse_descriptors(&encoded).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].tag, 0x09);
        assert_eq!(decoded[1].data, vec![0x01, 0x00, 0x00]);
    }

    #[test]
    fn parses_service_descriptor_names() {
        let mut data = vec![0x01u8]; // digital television
        data.push(3);
        data.extend_from_slice(b"BBC");
        data.push(7);
        data.extend_from_slice(b"BBC ONE");
        let parsed = parse_service_descriptor(&data).unwrap();
        assert_eq!(parsed.provider_name, "BBC");
        assert_eq!(parsed.service_name, "BBC ONE");
    }
}
