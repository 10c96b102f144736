//! ISO/IEC 13818-1 `stream_type` classification.
//!
//! vdkio's `format::ts::types` only names the three stream types it needs
//! for transcoding (H.264, H.265, AAC). This engine's PMT/AVS-only rewriter
//! needs to classify *any* stream_type into video/audio/subtitle/teletext/
//! other — an implementer decision the source leaves implicit in ad-hoc
//! comparisons against well-known constants (documented in DESIGN.md, DN-5).

/// A stream type, classified by media kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Video(u8),
    Audio(u8),
    Subtitle(u8),
    Teletext(u8),
    Other(u8),
}

impl StreamType {
    /// Classifies a raw `stream_type` byte as carried in a PMT entry.
    pub fn from_byte(value: u8) -> Self {
        match value {
            0x01 | 0x02 | 0x10 | 0x1b | 0x24 => StreamType::Video(value),
            0x03 | 0x04 | 0x0f | 0x11 | 0x81 => StreamType::Audio(value),
            // DVB subtitles and teletext are carried as private data
            // (stream_type 0x06); distinguishing them requires the
            // descriptor loop, handled by the caller via
            // `classify_with_descriptors`.
            0x06 => StreamType::Other(value),
            _ => StreamType::Other(value),
        }
    }

    /// Raw `stream_type` byte.
    pub fn raw(self) -> u8 {
        match self {
            StreamType::Video(v)
            | StreamType::Audio(v)
            | StreamType::Subtitle(v)
            | StreamType::Teletext(v)
            | StreamType::Other(v) => v,
        }
    }

    pub fn is_video(self) -> bool {
        matches!(self, StreamType::Video(_))
    }

    pub fn is_audio(self) -> bool {
        matches!(self, StreamType::Audio(_))
    }

    pub fn is_subtitle(self) -> bool {
        matches!(self, StreamType::Subtitle(_))
    }

    pub fn is_teletext(self) -> bool {
        matches!(self, StreamType::Teletext(_))
    }
}

/// Descriptor tags that indicate private-data stream_type 0x06 actually
/// carries DVB subtitles or teletext, per ETSI EN 300 468.
const DESCRIPTOR_TAG_SUBTITLING: u8 = 0x59;
const DESCRIPTOR_TAG_TELETEXT: u8 = 0x56;

/// Refines a stream_type=0x06 (private data) classification using the
/// elementary stream's descriptor loop, per ETSI EN 300 468's convention of
/// carrying subtitle/teletext component descriptors alongside private data.
pub fn classify_with_descriptors(
    stream_type: u8,
    descriptors: &[crate::format::ts::types::Descriptor],
) -> StreamType {
    if stream_type != 0x06 {
        return StreamType::from_byte(stream_type);
    }
    for d in descriptors {
        if d.tag == DESCRIPTOR_TAG_SUBTITLING {
            return StreamType::Subtitle(stream_type);
        }
        if d.tag == DESCRIPTOR_TAG_TELETEXT {
            return StreamType::Teletext(stream_type);
        }
    }
    StreamType::Other(stream_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_well_known_video_and_audio_types() {
        assert!(StreamType::from_byte(0x1b).is_video());
        assert!(StreamType::from_byte(0x0f).is_audio());
        assert!(!StreamType::from_byte(0x06).is_video());
    }

    #[test]
    fn private_data_refines_to_subtitle_via_descriptor() {
        let descriptors = vec![crate::format::ts::types::Descriptor {
            tag: DESCRIPTOR_TAG_SUBTITLING,
            data: vec![],
        }];
        let classified = classify_with_descriptors(0x06, &descriptors);
        assert!(classified.is_subtitle());
    }
}
