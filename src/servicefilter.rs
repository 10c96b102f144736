//! # Service Filter & PAT/PMT Rewriter
//!
//! One `ServiceFilter` per output (spec.md §4.5): subscribes to a single
//! cached service's elementary-stream PIDs and forwards matching packets
//! verbatim to the output's sink, while periodically synthesising a
//! single-program PAT and PMT so a downstream decoder sees a
//! self-contained single-service multiplex regardless of the source
//! multiplex's real program count.
//!
//! Packaging reuses `format::ts::types::{PAT, PMT}`'s body-only `write_to`
//! (inherited from vdkio, which only ever needed the payload bytes for its
//! own transcode path) and adds the section header, CRC, and TS-packet
//! split those legacy types never had.

use crate::cache::{ProgramInfo, Service, StreamEntry};
use crate::filter::{FilterGroup, PacketCallback};
use crate::format::ts::types::{ElementaryStreamInfo, PATEntry, PMT, PAT};
use crate::obj::Shared;
use crate::psi::classify_with_descriptors;
use crate::psi::crc::Crc32Mpeg2;
use crate::psi::descriptors::{component_tag_of, retain_component_descriptors};
use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// PID this crate synthesises PAT on for every service-filtered output.
/// Each output is its own single-program multiplex, so there's no
/// cross-output collision to worry about.
pub const SYNTHETIC_PAT_PID: u16 = 0x0000;
/// PID this crate synthesises PMT on.
pub const SYNTHETIC_PMT_PID: u16 = 0x0100;

const TABLE_ID_PAT: u8 = 0x00;
const TABLE_ID_PMT: u8 = 0x02;

/// Where a [`ServiceFilter`] hands finished 188-byte packets off to.
pub type PacketSink = Box<dyn Fn(&[u8; 188]) + Send + Sync>;

/// Per-output PID pass-through plus PAT/PMT synthesis for one service.
pub struct ServiceFilter {
    name: String,
    service: Shared<Service>,
    /// AVS-only mode: forward just the first video, first normal audio,
    /// first subtitle stream, and PCR — not every elementary stream.
    avs_only: bool,
    version: AtomicU8,
    /// Fingerprint of the service identity last folded into `version`: the
    /// PCR PID plus the chosen streams' `(pid, stream_type)` pairs. Compared
    /// at the top of every [`Self::rewrite`] so the synthesised version only
    /// increments when the service's identity (or, for a real upstream,
    /// its pmt-pid) actually changes, rather than once per cadence tick
    /// (spec.md §3, §4.5).
    last_identity: Mutex<Option<(u16, Vec<(u16, u8)>)>>,
    pat_continuity: Mutex<u8>,
    pmt_continuity: Mutex<u8>,
    sink: PacketSink,
}

impl ServiceFilter {
    pub fn new(name: impl Into<String>, service: Shared<Service>, avs_only: bool, sink: PacketSink) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            service,
            avs_only,
            version: AtomicU8::new(0),
            last_identity: Mutex::new(None),
            pat_continuity: Mutex::new(0),
            pmt_continuity: Mutex::new(0),
            sink,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds a [`FilterGroup`] that forwards this service's currently
    /// selected PIDs verbatim to the sink. Rebuild after a [`Self::rewrite`]
    /// cycle changes the selected stream set (e.g. after a PMT update).
    pub fn packet_group(self: &Arc<Self>) -> Arc<FilterGroup> {
        let group = Arc::new(FilterGroup::new(format!("servicefilter:{}", self.name), "output"));
        let Some(program_info) = self.service.program_info() else {
            return group;
        };
        for pid in self.selected_pids(&program_info) {
            let sink_filter = self.clone();
            let callback: PacketCallback = Box::new(move |_pid, packet| {
                if let Ok(array) = <[u8; 188]>::try_from(packet) {
                    (sink_filter.sink)(&array);
                }
            });
            group.subscribe_packets(pid, callback);
        }
        group
    }

    fn chosen_streams(&self, program_info: &ProgramInfo) -> Vec<StreamEntry> {
        if !self.avs_only {
            return program_info.streams.clone();
        }

        let mut video = None;
        let mut audio = None;
        let mut subtitle = None;
        for stream in &program_info.streams {
            let kind = classify_with_descriptors(stream.stream_type, &stream.descriptors);
            if video.is_none() && kind.is_video() {
                video = Some(stream.clone());
            }
            if audio.is_none() && kind.is_audio() {
                audio = Some(stream.clone());
            }
            if subtitle.is_none() && kind.is_subtitle() {
                subtitle = Some(stream.clone());
            }
        }
        [video, audio, subtitle].into_iter().flatten().collect()
    }

    fn selected_pids(&self, program_info: &ProgramInfo) -> Vec<u16> {
        let mut pids: Vec<u16> = self.chosen_streams(program_info).iter().map(|s| s.pid).collect();
        if program_info.pcr_pid != 0 && !pids.contains(&program_info.pcr_pid) {
            pids.push(program_info.pcr_pid);
        }
        pids
    }

    /// Synthesises PAT+PMT for the service's currently selected streams and
    /// emits them through the sink as complete TS packets. Called on a
    /// cadence timer (default 400ms, SPEC_FULL.md §11) by the owning
    /// output, but the section `version` only advances when the selected
    /// streams' identity (PCR PID plus each stream's pid/type) actually
    /// changed since the last call, not on every tick (spec.md §3, §4.5). A
    /// budget overflow (more section bytes than fit sanely in a handful of
    /// packets) is logged and skipped rather than treated as fatal, matching
    /// spec.md §4.5's non-fatal overflow policy.
    pub fn rewrite(&self) -> Vec<[u8; 188]> {
        let Some(program_info) = self.service.program_info() else {
            return Vec::new();
        };

        let mut pat = PAT::new();
        pat.entries.push(PATEntry {
            program_number: self.service.service_id,
            network_pid: 0,
            program_map_pid: SYNTHETIC_PMT_PID,
        });

        let streams = self.chosen_streams(&program_info);

        let kept_component_tags: Vec<u8> = streams.iter().filter_map(|s| component_tag_of(&s.descriptors)).collect();
        let program_descriptors = if self.avs_only {
            // AVS-only mode dropped every stream but one video/audio/subtitle
            // plus PCR; any component descriptor pointing at a dropped
            // stream's component_tag no longer applies (spec.md §4.5).
            retain_component_descriptors(&program_info.program_descriptors, &kept_component_tags)
        } else {
            program_info.program_descriptors.clone()
        };

        let mut pmt = PMT::new();
        pmt.pcr_pid = program_info.pcr_pid;
        pmt.program_descriptors = program_descriptors;
        for stream in &streams {
            pmt.elementary_stream_infos.push(ElementaryStreamInfo {
                stream_type: stream.stream_type,
                elementary_pid: stream.pid,
                descriptors: stream.descriptors.clone(),
            });
        }

        let identity: (u16, Vec<(u16, u8)>) = (
            program_info.pcr_pid,
            streams.iter().map(|s| (s.pid, s.stream_type)).collect(),
        );
        let mut last_identity = self.last_identity.lock();
        if last_identity.as_ref() != Some(&identity) {
            self.version.fetch_add(1, Ordering::Relaxed);
            *last_identity = Some(identity);
        }
        drop(last_identity);
        let version = self.version.load(Ordering::Relaxed) & 0x1f;

        let mut pat_body = BytesMut::new();
        if pat.write_to(&mut pat_body).is_err() {
            tracing::error!(output = self.name.as_str(), "PAT rewrite overflowed its packet budget, skipping cycle");
            return Vec::new();
        }
        let mut pmt_body = BytesMut::new();
        if pmt.write_to(&mut pmt_body).is_err() {
            tracing::error!(output = self.name.as_str(), "PMT rewrite overflowed its packet budget, skipping cycle");
            return Vec::new();
        }

        let mut packets = pack_section(
            SYNTHETIC_PAT_PID,
            TABLE_ID_PAT,
            self.service.multiplex_uid as u16,
            version,
            &pat_body,
            &mut self.pat_continuity.lock(),
        );
        packets.extend(pack_section(
            SYNTHETIC_PMT_PID,
            TABLE_ID_PMT,
            self.service.service_id,
            version,
            &pmt_body,
            &mut self.pmt_continuity.lock(),
        ));

        for packet in &packets {
            (self.sink)(packet);
        }
        packets
    }
}

/// Wraps `body` (a PAT/PMT payload, as produced by `PAT::write_to`/
/// `PMT::write_to`) in a long-form section header and CRC32, then splits
/// the result across as many 188-byte TS packets as needed, starting each
/// run with a pointer field on the first packet and 0xff stuffing on the
/// last. `cc` is this PID's running continuity counter, advanced once per
/// packet emitted.
fn pack_section(pid: u16, table_id: u8, extension: u16, version: u8, body: &[u8], cc: &mut u8) -> Vec<[u8; 188]> {
    let section_length = 5 + body.len() + 4;
    let mut section = Vec::with_capacity(3 + section_length);
    section.push(table_id);
    section.push(0x80 | ((section_length >> 8) as u8 & 0x0f));
    section.push(section_length as u8);
    section.push((extension >> 8) as u8);
    section.push(extension as u8);
    section.push(0xc1 | (version << 1)); // reserved(11) + version + current_next=1
    section.push(0x00); // section_number
    section.push(0x00); // last_section_number
    section.extend_from_slice(body);
    let crc = Crc32Mpeg2::new().calculate(&section);
    section.extend_from_slice(&crc.to_be_bytes());

    let mut packets = Vec::new();
    let mut remaining = &section[..];
    let mut first = true;

    while !remaining.is_empty() || first {
        let mut packet = [0xffu8; 188];
        packet[0] = 0x47;
        let payload_unit_start = if first { 0x40 } else { 0x00 };
        packet[1] = payload_unit_start | ((pid >> 8) as u8 & 0x1f);
        packet[2] = pid as u8;
        packet[3] = 0x10 | (*cc & 0x0f);
        *cc = cc.wrapping_add(1) & 0x0f;

        let mut offset = 4;
        if first {
            packet[offset] = 0; // pointer field: section starts immediately
            offset += 1;
        }

        let available = 188 - offset;
        let take = remaining.len().min(available);
        packet[offset..offset + take].copy_from_slice(&remaining[..take]);
        remaining = &remaining[take..];

        packets.push(packet);
        first = false;
        if remaining.is_empty() {
            break;
        }
    }

    packets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ProgramInfo, ServiceCache, StreamEntry};
    use crate::obj::Shared;
    use crate::store::Store;
    use std::sync::Arc as StdArc;

    async fn service_with_streams(streams: Vec<StreamEntry>) -> Shared<Service> {
        let store = StdArc::new(Store::connect_in_memory().await.unwrap());
        let cache = ServiceCache::new(store);
        let mux = crate::cache::Multiplex::new(1, Vec::new());
        cache.load(mux).await.unwrap();
        let service = cache.add(7, 0);
        cache.update_program_info(
            &service,
            0,
            ProgramInfo {
                pcr_pid: 0x101,
                program_descriptors: Vec::new(),
                streams,
            },
        );
        service
    }

    #[tokio::test]
    async fn avs_only_selects_first_video_and_audio() {
        let service = service_with_streams(vec![
            StreamEntry { pid: 0x101, stream_type: 0x1b, descriptors: Vec::new() },
            StreamEntry { pid: 0x102, stream_type: 0x0f, descriptors: Vec::new() },
            StreamEntry { pid: 0x103, stream_type: 0x0f, descriptors: Vec::new() },
        ])
        .await;

        let filter = ServiceFilter::new("out1", service, true, Box::new(|_| {}));
        let program_info = filter.service.program_info().unwrap();
        let chosen = filter.chosen_streams(&program_info);
        assert_eq!(chosen.len(), 2);
        assert_eq!(chosen[0].pid, 0x101);
        assert_eq!(chosen[1].pid, 0x102);
    }

    #[tokio::test]
    async fn rewrite_emits_one_packet_each_for_pat_and_pmt() {
        let service = service_with_streams(vec![StreamEntry {
            pid: 0x101,
            stream_type: 0x1b,
            descriptors: Vec::new(),
        }])
        .await;
        let emitted = StdArc::new(parking_lot::Mutex::new(Vec::new()));
        let sink_emitted = emitted.clone();
        let filter = ServiceFilter::new(
            "out1",
            service,
            false,
            Box::new(move |packet| sink_emitted.lock().push(*packet)),
        );

        let packets = filter.rewrite();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0][0], 0x47);
        assert_eq!(emitted.lock().len(), 2);
    }

    fn section_version(packet: &[u8; 188]) -> u8 {
        (packet[10] >> 1) & 0x1f
    }

    #[tokio::test]
    async fn version_unchanged_across_identical_rewrites() {
        let service = service_with_streams(vec![StreamEntry {
            pid: 0x101,
            stream_type: 0x1b,
            descriptors: Vec::new(),
        }])
        .await;
        let filter = ServiceFilter::new("out1", service, false, Box::new(|_| {}));

        let first = filter.rewrite();
        let second = filter.rewrite();
        assert_eq!(section_version(&first[0]), section_version(&second[0]));
    }

    #[tokio::test]
    async fn version_bumps_when_stream_set_changes() {
        let store = StdArc::new(Store::connect_in_memory().await.unwrap());
        let cache = ServiceCache::new(store);
        let mux = crate::cache::Multiplex::new(1, Vec::new());
        cache.load(mux).await.unwrap();
        let service = cache.add(7, 0);
        cache.update_program_info(
            &service,
            0,
            ProgramInfo {
                pcr_pid: 0x101,
                program_descriptors: Vec::new(),
                streams: vec![StreamEntry { pid: 0x101, stream_type: 0x1b, descriptors: Vec::new() }],
            },
        );

        let filter = ServiceFilter::new("out1", service.clone(), false, Box::new(|_| {}));

        let before = filter.rewrite();
        let version_before = section_version(&before[0]);

        cache.update_program_info(
            &service,
            0,
            ProgramInfo {
                pcr_pid: 0x101,
                program_descriptors: Vec::new(),
                streams: vec![
                    StreamEntry { pid: 0x101, stream_type: 0x1b, descriptors: Vec::new() },
                    StreamEntry { pid: 0x102, stream_type: 0x0f, descriptors: Vec::new() },
                ],
            },
        );

        let after = filter.rewrite();
        let version_after = section_version(&after[0]);
        assert_ne!(version_before, version_after);
    }

    #[tokio::test]
    async fn avs_only_strips_component_descriptors_for_dropped_streams() {
        use crate::format::ts::types::Descriptor;
        use crate::psi::descriptors::{TAG_COMPONENT, TAG_STREAM_IDENTIFIER};

        let video_component_tag = 1u8;
        let audio_component_tag = 2u8;
        let dropped_component_tag = 3u8;

        let store = StdArc::new(Store::connect_in_memory().await.unwrap());
        let cache = ServiceCache::new(store);
        let mux = crate::cache::Multiplex::new(1, Vec::new());
        cache.load(mux).await.unwrap();
        let service = cache.add(7, 0);
        cache.update_program_info(
            &service,
            0,
            ProgramInfo {
                pcr_pid: 0x101,
                program_descriptors: vec![
                    Descriptor { tag: TAG_COMPONENT, data: vec![0x00, 0x00, video_component_tag] },
                    Descriptor { tag: TAG_COMPONENT, data: vec![0x00, 0x00, dropped_component_tag] },
                ],
                streams: vec![
                    StreamEntry {
                        pid: 0x101,
                        stream_type: 0x1b,
                        descriptors: vec![Descriptor { tag: TAG_STREAM_IDENTIFIER, data: vec![video_component_tag] }],
                    },
                    StreamEntry {
                        pid: 0x102,
                        stream_type: 0x0f,
                        descriptors: vec![Descriptor { tag: TAG_STREAM_IDENTIFIER, data: vec![audio_component_tag] }],
                    },
                    StreamEntry {
                        pid: 0x103,
                        stream_type: 0x05,
                        descriptors: vec![Descriptor { tag: TAG_STREAM_IDENTIFIER, data: vec![dropped_component_tag] }],
                    },
                ],
            },
        );

        let filter = ServiceFilter::new("out1", service, true, Box::new(|_| {}));
        let program_info = filter.service.program_info().unwrap();
        let streams = filter.chosen_streams(&program_info);
        let kept: Vec<u8> = streams
            .iter()
            .filter_map(|s| crate::psi::descriptors::component_tag_of(&s.descriptors))
            .collect();
        let retained = crate::psi::descriptors::retain_component_descriptors(
            &program_info.program_descriptors,
            &kept,
        );
        assert_eq!(retained.len(), 1);
        assert_eq!(retained[0].data[2], video_component_tag);
    }
}
