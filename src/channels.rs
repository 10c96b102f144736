//! # `channels.conf` Importer
//!
//! Seeds the store with multiplex/service/PID rows parsed from a VDR-style
//! `channels.conf` file, the way `original_source/include/parsezap.h`'s
//! `parsezapfile(path, delSys)` seeds the cache before the first tune. The
//! `.c` body behind that header wasn't retrieved into this pack, so the
//! per-field line grammar below follows VDR's well-known `channels.conf`
//! format directly rather than a transcription (see DESIGN.md).
//!
//! Accepted line shape (colon-separated, satellite/cable/terrestrial alike):
//!
//! ```text
//! name[;provider]:frequency:params:source:symbolrate:vpid:apid:tpid:ca:sid:nid:tid:rid
//! ```
//!
//! `vpid`/`apid` may each carry extra `+type` or `=lang` suffixes and
//! multiple `,`-separated alternates; only the leading numeric PID of each
//! is kept; see [`parse_pid_list`].

use crate::error::{EngineError, Result};
use crate::store::models::{MultiplexRow, PidRow, ServiceRow};
use crate::store::{self, Store};
use std::collections::HashMap;
use std::path::Path;

/// One channel line, reduced to the fields this engine's cache/store cares
/// about (tuning parameters beyond frequency/source are kept verbatim as
/// opaque bytes, not decoded further — channel tuning itself is out of
/// scope, per `crate::tuner`'s module doc).
struct ParsedChannel {
    name: String,
    provider: String,
    source: String,
    tuning_params: String,
    video_pid: u16,
    audio_pids: Vec<u16>,
    teletext_pid: u16,
    conditional_access: bool,
    service_id: u16,
    network_id: u16,
    transport_stream_id: u16,
}

/// Parses `path` and upserts every channel line into `store` as a seed
/// multiplex/service/PID row set, returning the number of channels
/// imported. Malformed lines are logged and skipped rather than aborting
/// the whole import, matching `ProcessFile`'s "report and continue" policy
/// for bad commands elsewhere in the same source tree.
pub async fn import(store: &Store, path: &Path) -> Result<usize> {
    let content = std::fs::read_to_string(path)?;
    let mut multiplex_uids: HashMap<(u16, String), i64> = HashMap::new();
    let mut next_uid: i64 = 1;
    let mut imported = 0usize;

    for (lineno, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let channel = match parse_line(line) {
            Ok(channel) => channel,
            Err(err) => {
                tracing::warn!(line = lineno + 1, %err, "skipping malformed channels.conf entry");
                continue;
            }
        };

        if channel.source.starts_with('S') {
            log_satellite_if(&channel);
        }

        let key = (channel.transport_stream_id, channel.source.clone());
        let multiplex_uid = *multiplex_uids.entry(key).or_insert_with(|| {
            let uid = next_uid;
            next_uid += 1;
            uid
        });

        store
            .ensure_multiplex(
                multiplex_uid,
                channel.transport_stream_id as i64,
                channel.network_id as i64,
            )
            .await?;

        let mut tx = store.begin().await?;
        store::upsert_multiplex(
            &mut tx,
            &MultiplexRow {
                uid: multiplex_uid,
                kind: "dvb".to_string(),
                tsid: channel.transport_stream_id as i64,
                netid: channel.network_id as i64,
                pat_version: -1,
                tuningparams: channel.tuning_params.as_bytes().to_vec(),
            },
        )
        .await?;

        store::upsert_service(
            &mut tx,
            &ServiceRow {
                multiplexuid: multiplex_uid,
                id: channel.service_id as i64,
                source: 0,
                ca: channel.conditional_access as i64,
                kind: 0x01,
                name: channel.name.clone(),
                provider: channel.provider.clone(),
                defauthority: String::new(),
                pmtpid: 0,
                pmtversion: -1,
                pcrpid: channel.video_pid as i64,
            },
        )
        .await?;

        let pid_rows: Vec<PidRow> = std::iter::once(PidRow {
            multiplexuid: multiplex_uid,
            serviceid: channel.service_id as i64,
            pid: channel.video_pid as i64,
            kind: 0x02, // video (ISO/IEC 13818-2), the common case for a seed import
            subtype: 0,
            pmtversion: -1,
            descriptors: Vec::new(),
        })
        .chain(channel.audio_pids.iter().map(|pid| PidRow {
            multiplexuid: multiplex_uid,
            serviceid: channel.service_id as i64,
            pid: *pid as i64,
            kind: 0x04, // audio (ISO/IEC 13818-3)
            subtype: 0,
            pmtversion: -1,
            descriptors: Vec::new(),
        }))
        .chain(
            (channel.teletext_pid != 0)
                .then(|| PidRow {
                    multiplexuid: multiplex_uid,
                    serviceid: channel.service_id as i64,
                    pid: channel.teletext_pid as i64,
                    kind: 0x06, // teletext/subtitle private stream
                    subtype: 0,
                    pmtversion: -1,
                    descriptors: Vec::new(),
                })
                .into_iter(),
        )
        .collect();

        store::replace_pids(
            &mut tx,
            multiplex_uid,
            channel.service_id as i64,
            0,
            channel.video_pid as i64,
            -1,
            &pid_rows,
        )
        .await?;

        tx.commit().await?;
        imported += 1;
    }

    Ok(imported)
}

fn log_satellite_if(channel: &ParsedChannel) {
    let Some(frequency) = channel.tuning_params.split(':').next().and_then(|s| s.parse::<u32>().ok()) else {
        return;
    };
    let lnb = crate::lnb::find_standard("UNIVERSAL").expect("UNIVERSAL is always a standard profile");
    let (intermediate, hiband) = crate::lnb::transponder_to_intermediate(&lnb, frequency * 1000);
    tracing::debug!(
        channel = channel.name.as_str(),
        intermediate_khz = intermediate,
        hiband,
        "computed satellite intermediate frequency for imported channel"
    );
}

fn parse_line(line: &str) -> Result<ParsedChannel> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 13 {
        return Err(EngineError::InvalidData(format!(
            "expected at least 13 colon-separated fields, found {}",
            fields.len()
        )));
    }

    let (name, provider) = match fields[0].split_once(';') {
        Some((name, provider)) => (name.to_string(), provider.to_string()),
        None => (fields[0].to_string(), String::new()),
    };

    let tuning_params = format!("{}:{}", fields[1], fields[2]);
    let source = fields[3].to_string();
    let video_pid = parse_leading_pid(fields[5])?;
    let audio_pids = parse_pid_list(fields[6]);
    let teletext_pid = parse_leading_pid(fields[7]).unwrap_or(0);
    let conditional_access = fields[8].parse::<i32>().unwrap_or(0) != 0;
    let service_id = fields[9].parse::<u16>()?;
    let network_id = fields[10].parse::<u16>()?;
    let transport_stream_id = fields[11].parse::<u16>()?;

    Ok(ParsedChannel {
        name,
        provider,
        source,
        tuning_params,
        video_pid,
        audio_pids,
        teletext_pid,
        conditional_access,
        service_id,
        network_id,
        transport_stream_id,
    })
}

/// Parses the first PID out of a field that may carry `+type`/`=lang`
/// suffixes and `,`-separated alternates (e.g. `"101=deu,102=eng"`).
fn parse_leading_pid(field: &str) -> Result<u16> {
    let first = field.split(',').next().unwrap_or(field);
    let numeric: &str = first.split(|c| c == '+' || c == '=').next().unwrap_or(first);
    Ok(numeric.trim().parse()?)
}

/// Parses every PID in a `,`-separated field, ignoring `+type`/`=lang`
/// suffixes on each alternate.
fn parse_pid_list(field: &str) -> Vec<u16> {
    field
        .split(',')
        .filter_map(|part| {
            let numeric = part.split(|c| c == '+' || c == '=').next()?;
            numeric.trim().parse().ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_classic_terrestrial_line() {
        let channel = parse_line("BBC ONE;BBC:602000:B8C23D0:T:0:101:102=eng,103=sign:104:0:4164:9018:1")
            .unwrap();
        assert_eq!(channel.name, "BBC ONE");
        assert_eq!(channel.provider, "BBC");
        assert_eq!(channel.video_pid, 101);
        assert_eq!(channel.audio_pids, vec![102, 103]);
        assert_eq!(channel.teletext_pid, 104);
        assert_eq!(channel.service_id, 4164);
        assert_eq!(channel.network_id, 9018);
        assert_eq!(channel.transport_stream_id, 1);
    }

    #[test]
    fn rejects_a_line_with_too_few_fields() {
        assert!(parse_line("Broken:123:456").is_err());
    }

    #[tokio::test]
    async fn import_seeds_store_with_service_and_pids() {
        let store = Store::connect_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.conf");
        std::fs::write(
            &path,
            "BBC ONE;BBC:602000:B8C23D0:T:0:101:102=eng:104:0:4164:9018:1\n\
             BBC TWO;BBC:602000:B8C23D0:T:0:201:202=eng:0:0:4165:9018:1\n",
        )
        .unwrap();

        let count = import(&store, &path).await.unwrap();
        assert_eq!(count, 2);

        let services = store.load_services(1).await.unwrap();
        assert_eq!(services.len(), 2);
        assert!(services.iter().any(|s| s.name == "BBC ONE"));
    }
}
