//! # Service Cache
//!
//! The serialised, single-writer in-RAM snapshot of the current multiplex's
//! services, PIDs, and PMT versions, with an explicit write-back to the
//! persistent [`crate::store::Store`]. Mirrors
//! `examples/original_source/src/cache.c`'s `CacheServiceAdd`/
//! `CacheUpdateService*`/`CacheWriteback` family, generalized behind one
//! `parking_lot::Mutex` guarding the in-memory state (spec.md §4.3's "a
//! single mutex guards the whole cache").
//!
//! Weak back-references: a [`Service`] names its [`Multiplex`] only by
//! `multiplex_uid`, never by holding an `Arc<Multiplex>` — resolving it
//! means asking the cache, per Design Note DN-2.

use crate::obj::{Shared, Uid, UidAllocator};
use crate::store::models::{PidRow, ServiceRow};
use crate::store::{self, Store};
use crate::error::Result;
use bitflags::bitflags;
use parking_lot::Mutex;
use std::sync::Arc;

bitflags! {
    /// Per-service dirty bits; [`ServiceCache::writeback`] only persists the
    /// fields a bit names, then clears it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DirtyFlags: u16 {
        const ADDED              = 1 << 0;
        const PMT_PID            = 1 << 1;
        const PIDS                = 1 << 2;
        const NAME               = 1 << 3;
        const PROVIDER           = 1 << 4;
        const TYPE                = 1 << 5;
        const CA                  = 1 << 6;
        const DEFAULT_AUTHORITY  = 1 << 7;
    }
}

/// Service type classification (ETSI EN 300 468 service_type descriptor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Tv,
    Radio,
    Data,
    Unknown,
}

impl From<u8> for ServiceKind {
    fn from(value: u8) -> Self {
        match value {
            0x01 | 0x11 | 0x16 | 0x19 => ServiceKind::Tv,
            0x02 | 0x0a => ServiceKind::Radio,
            0x0c | 0x0d => ServiceKind::Data,
            _ => ServiceKind::Unknown,
        }
    }
}

impl From<ServiceKind> for i64 {
    fn from(value: ServiceKind) -> Self {
        match value {
            ServiceKind::Tv => 0x01,
            ServiceKind::Radio => 0x02,
            ServiceKind::Data => 0x0c,
            ServiceKind::Unknown => 0x00,
        }
    }
}

/// One elementary stream entry, as carried in a [`ProgramInfo`].
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub pid: u16,
    pub stream_type: u8,
    pub descriptors: Vec<crate::format::ts::types::Descriptor>,
}

/// The payload of the most recently decoded PMT version for a service.
/// Replaces any prior `ProgramInfo` atomically (spec.md §3).
#[derive(Debug, Clone, Default)]
pub struct ProgramInfo {
    pub pcr_pid: u16,
    pub program_descriptors: Vec<crate::format::ts::types::Descriptor>,
    pub streams: Vec<StreamEntry>,
}

/// A single transport stream on a single carrier. *Owner*: the cache while
/// current; the store otherwise (spec.md §3).
pub struct Multiplex {
    pub uid: Uid,
    state: Mutex<MultiplexState>,
}

struct MultiplexState {
    tuning_params: Vec<u8>,
    transport_stream_id: u16,
    original_network_id: u16,
    /// -1 means "no PAT received yet on this multiplex" (spec.md §4.4.1).
    pat_version: i32,
}

impl Multiplex {
    pub fn new(uid: Uid, tuning_params: Vec<u8>) -> Shared<Self> {
        Arc::new(Self {
            uid,
            state: Mutex::new(MultiplexState {
                tuning_params,
                transport_stream_id: 0,
                original_network_id: 0,
                pat_version: -1,
            }),
        })
    }

    pub fn transport_stream_id(&self) -> u16 {
        self.state.lock().transport_stream_id
    }

    pub fn original_network_id(&self) -> u16 {
        self.state.lock().original_network_id
    }

    pub fn pat_version(&self) -> i32 {
        self.state.lock().pat_version
    }

    pub fn tuning_params(&self) -> Vec<u8> {
        self.state.lock().tuning_params.clone()
    }

    /// `true` the moment the first PAT hasn't been seen yet on this mux.
    pub fn is_first_pat(&self) -> bool {
        self.pat_version() == -1
    }

    fn set_pat(&self, version: u8, tsid: u16, onid: Option<u16>) {
        let mut state = self.state.lock();
        state.pat_version = version as i32;
        state.transport_stream_id = tsid;
        if let Some(onid) = onid {
            state.original_network_id = onid;
        }
    }

    fn set_onid(&self, onid: u16) {
        self.state.lock().original_network_id = onid;
    }
}

/// An in-RAM service record. Mutable fields live behind one internal mutex;
/// `uid`/`multiplex_uid`/`service_id`/`source_id` are immutable identity.
pub struct Service {
    pub uid: Uid,
    pub multiplex_uid: Uid,
    pub service_id: u16,
    pub source_id: u16,
    state: Mutex<ServiceState>,
}

struct ServiceState {
    name: String,
    provider: String,
    default_authority: String,
    kind: ServiceKind,
    conditional_access: bool,
    pmt_pid: u16,
    pmt_version: i32,
    pcr_pid: u16,
    program_info: Option<Arc<ProgramInfo>>,
    dirty: DirtyFlags,
    pat_seen: bool,
    sdt_seen: bool,
}

impl Service {
    fn new(uid: Uid, multiplex_uid: Uid, service_id: u16, source_id: u16) -> Shared<Self> {
        Arc::new(Self {
            uid,
            multiplex_uid,
            service_id,
            source_id,
            state: Mutex::new(ServiceState {
                name: String::new(),
                provider: String::new(),
                default_authority: String::new(),
                kind: ServiceKind::Unknown,
                conditional_access: false,
                pmt_pid: 0,
                pmt_version: -1,
                pcr_pid: 0,
                program_info: None,
                dirty: DirtyFlags::ADDED,
                pat_seen: false,
                sdt_seen: false,
            }),
        })
    }

    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    pub fn provider(&self) -> String {
        self.state.lock().provider.clone()
    }

    pub fn default_authority(&self) -> String {
        self.state.lock().default_authority.clone()
    }

    pub fn kind(&self) -> ServiceKind {
        self.state.lock().kind
    }

    pub fn conditional_access(&self) -> bool {
        self.state.lock().conditional_access
    }

    pub fn pmt_pid(&self) -> u16 {
        self.state.lock().pmt_pid
    }

    pub fn pmt_version(&self) -> i32 {
        self.state.lock().pmt_version
    }

    pub fn pcr_pid(&self) -> u16 {
        self.state.lock().pcr_pid
    }

    pub fn program_info(&self) -> Option<Arc<ProgramInfo>> {
        self.state.lock().program_info.clone()
    }

    pub fn dirty(&self) -> DirtyFlags {
        self.state.lock().dirty
    }

    fn set_pmt_pid(&self, pid: u16) {
        let mut state = self.state.lock();
        if state.pmt_pid != pid {
            state.pmt_pid = pid;
            state.dirty.insert(DirtyFlags::PMT_PID);
        }
    }
}

/// Services removed during the session, pending a `writeback` that deletes
/// their store rows.
struct CacheInner {
    current_multiplex: Option<Shared<Multiplex>>,
    services: Vec<Shared<Service>>,
    deleted: Vec<Shared<Service>>,
    uids: UidAllocator,
}

/// Single-writer in-RAM snapshot of the current multiplex's services. One
/// `ServiceCache` is shared (via `Arc`) across the TS reader, the table
/// processors, and the operator shell.
pub struct ServiceCache {
    store: Arc<Store>,
    inner: Mutex<CacheInner>,
}

impl ServiceCache {
    /// Builds an empty cache backed by `store`.
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            inner: Mutex::new(CacheInner {
                current_multiplex: None,
                services: Vec::new(),
                deleted: Vec::new(),
                uids: UidAllocator::starting_at(1),
            }),
        }
    }

    /// Binds the cache to `multiplex`, loading its services and program
    /// info from the store and discarding any prior cache state.
    /// Idempotent when called again for the same multiplex uid and no
    /// in-flight mutations have occurred, per spec.md §8's load-idempotence
    /// law.
    pub async fn load(&self, multiplex: Shared<Multiplex>) -> Result<()> {
        self.store
            .ensure_multiplex(
                multiplex.uid as i64,
                multiplex.transport_stream_id() as i64,
                multiplex.original_network_id() as i64,
            )
            .await?;

        let service_rows = self.store.load_services(multiplex.uid as i64).await?;
        let mut services = Vec::with_capacity(service_rows.len());
        let mut max_uid = 0u32;

        for row in service_rows {
            let service = self.service_from_row(&row);
            let pid_rows = self
                .store
                .load_pids(multiplex.uid as i64, row.id)
                .await?;
            if !pid_rows.is_empty() {
                let program_info = program_info_from_rows(&pid_rows, row.pmtpid as u16, row.pcrpid as u16);
                let mut state = service.state.lock();
                state.program_info = Some(Arc::new(program_info));
                state.dirty = DirtyFlags::empty();
            } else {
                service.state.lock().dirty = DirtyFlags::empty();
            }
            max_uid = max_uid.max(row.id as u32);
            services.push(service);
        }

        let mut inner = self.inner.lock();
        inner.current_multiplex = Some(multiplex);
        inner.services = services;
        inner.deleted.clear();
        inner.uids = UidAllocator::starting_at(max_uid + 1);
        Ok(())
    }

    fn service_from_row(&self, row: &ServiceRow) -> Shared<Service> {
        let service = Service::new(row.id as Uid, row.multiplexuid as Uid, row.id as u16, row.source as u16);
        let mut state = service.state.lock();
        state.name = row.name.clone();
        state.provider = row.provider.clone();
        state.default_authority = row.defauthority.clone();
        state.kind = ServiceKind::from(row.kind as u8);
        state.conditional_access = row.ca != 0;
        state.pmt_pid = row.pmtpid as u16;
        state.pmt_version = row.pmtversion as i32;
        state.pcr_pid = row.pcrpid as u16;
        drop(state);
        service
    }

    /// Looks up a cached service by its `service_id` within the bound
    /// multiplex.
    pub fn find_by_id(&self, service_id: u16) -> Option<Shared<Service>> {
        self.inner
            .lock()
            .services
            .iter()
            .find(|s| s.service_id == service_id)
            .cloned()
    }

    /// Looks up a service by name, falling back to the store when the
    /// in-memory cache misses (spec.md §4.3).
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Shared<Service>>> {
        if let Some(found) = self
            .inner
            .lock()
            .services
            .iter()
            .find(|s| s.name() == name)
            .cloned()
        {
            return Ok(Some(found));
        }
        match self.store.find_service_by_name(name).await? {
            Some(row) => Ok(Some(self.service_from_row(&row))),
            None => Ok(None),
        }
    }

    /// The multiplex the cache is currently bound to, if [`Self::load`] has
    /// been called.
    pub fn current_multiplex(&self) -> Option<Shared<Multiplex>> {
        self.inner.lock().current_multiplex.clone()
    }

    /// Every service currently live in the cache. Paired with no explicit
    /// "release" call — unlike the source's borrowed-pointer API, the
    /// returned `Arc`s keep their services alive independently of the
    /// cache's own lock.
    pub fn services(&self) -> Vec<Shared<Service>> {
        self.inner.lock().services.clone()
    }

    /// Creates a new service record, marked dirty as [`DirtyFlags::ADDED`].
    pub fn add(&self, service_id: u16, source_id: u16) -> Shared<Service> {
        let mut inner = self.inner.lock();
        let multiplex_uid = inner
            .current_multiplex
            .as_ref()
            .map(|m| m.uid)
            .unwrap_or_default();
        let uid = inner.uids.next();
        let service = Service::new(uid, multiplex_uid, service_id, source_id);
        inner.services.push(service.clone());
        service
    }

    /// Moves `service` from the live set into `deleted`, pending writeback.
    pub fn delete(&self, service: &Shared<Service>) {
        let mut inner = self.inner.lock();
        inner.services.retain(|s| s.uid != service.uid);
        inner.deleted.push(service.clone());
    }

    /// Records whether `service` was observed in the table sweep that just
    /// completed (`is_pat` selects which seen-bit is updated) and returns
    /// whether the service is still considered alive.
    ///
    /// Per Open Question OQ-2 (see SPEC_FULL.md §14): a service becomes
    /// eligible for deletion only once **both** its PAT-seen and SDT-seen
    /// bits are false at the end of the cycle that just reported
    /// `present_in_table = false` for one of them — a PAT-only or SDT-only
    /// gap alone never deletes it (Seed Scenario 3).
    pub fn seen(&self, service: &Shared<Service>, present_in_table: bool, is_pat: bool) -> bool {
        let (pat_seen, sdt_seen) = {
            let mut state = service.state.lock();
            if is_pat {
                state.pat_seen = present_in_table;
            } else {
                state.sdt_seen = present_in_table;
            }
            (state.pat_seen, state.sdt_seen)
        };
        let alive = pat_seen || sdt_seen;
        if !alive {
            self.delete(service);
        }
        alive
    }

    /// Marks the bound multiplex dirty with a new PAT version and tsid.
    /// `onid` is `None` when called from the PAT processor (the PAT itself
    /// doesn't carry an original_network_id); the SDT processor supplies it
    /// via [`Self::update_multiplex_onid`].
    pub fn update_multiplex(&self, pat_version: u8, tsid: u16, onid: Option<u16>) {
        if let Some(mux) = self.inner.lock().current_multiplex.clone() {
            mux.set_pat(pat_version, tsid, onid);
        }
    }

    /// Updates only the bound multiplex's original_network_id, as reported
    /// by an SDT section.
    pub fn update_multiplex_onid(&self, onid: u16) {
        if let Some(mux) = self.inner.lock().current_multiplex.clone() {
            mux.set_onid(onid);
        }
    }

    /// Updates a service's name, marking it dirty if changed.
    pub fn update_service_name(&self, service: &Shared<Service>, name: &str) {
        let mut state = service.state.lock();
        if state.name != name {
            state.name = name.to_string();
            state.dirty.insert(DirtyFlags::NAME);
        }
    }

    pub fn update_service_provider(&self, service: &Shared<Service>, provider: &str) {
        let mut state = service.state.lock();
        if state.provider != provider {
            state.provider = provider.to_string();
            state.dirty.insert(DirtyFlags::PROVIDER);
        }
    }

    pub fn update_service_type(&self, service: &Shared<Service>, kind: ServiceKind) {
        let mut state = service.state.lock();
        if state.kind != kind {
            state.kind = kind;
            state.dirty.insert(DirtyFlags::TYPE);
        }
    }

    pub fn update_service_ca(&self, service: &Shared<Service>, conditional_access: bool) {
        let mut state = service.state.lock();
        if state.conditional_access != conditional_access {
            state.conditional_access = conditional_access;
            state.dirty.insert(DirtyFlags::CA);
        }
    }

    pub fn update_service_default_authority(&self, service: &Shared<Service>, authority: &str) {
        let mut state = service.state.lock();
        if state.default_authority != authority {
            state.default_authority = authority.to_string();
            state.dirty.insert(DirtyFlags::DEFAULT_AUTHORITY);
        }
    }

    /// Sets the service's `pmt_pid`, marking it dirty if changed (PAT
    /// processor's per-program sweep, spec.md §4.4.1).
    pub fn update_service_pmt_pid(&self, service: &Shared<Service>, pmt_pid: u16) {
        service.set_pmt_pid(pmt_pid);
    }

    /// Replaces `service`'s `ProgramInfo` atomically and bumps its
    /// `pmt_version` (spec.md §4.3).
    pub fn update_program_info(&self, service: &Shared<Service>, version: u8, program_info: ProgramInfo) {
        let mut state = service.state.lock();
        state.pcr_pid = program_info.pcr_pid;
        state.pmt_version = version as i32;
        state.program_info = Some(Arc::new(program_info));
        state.dirty.insert(DirtyFlags::PIDS);
    }

    /// Persists every pending change within one store transaction: deletes,
    /// multiplex row, dirty services, PID replacement, then clears dirty
    /// bits. On any failure the transaction rolls back and dirty bits are
    /// left set so the next writeback retries (spec.md §7 Persistence).
    pub async fn writeback(&self) -> Result<()> {
        let (multiplex_uid, deleted, dirty_services) = {
            let mut inner = self.inner.lock();
            let multiplex_uid = inner.current_multiplex.as_ref().map(|m| m.uid).unwrap_or_default();
            let deleted = std::mem::take(&mut inner.deleted);
            let dirty: Vec<_> = inner
                .services
                .iter()
                .filter(|s| !s.dirty().is_empty())
                .cloned()
                .collect();
            (multiplex_uid, deleted, dirty)
        };

        let mut tx = self.store.begin().await?;

        for service in &deleted {
            store::delete_service(&mut tx, multiplex_uid as i64, service.uid as i64).await?;
        }

        if let Some(mux) = self.inner.lock().current_multiplex.clone() {
            store::upsert_multiplex(
                &mut tx,
                &crate::store::models::MultiplexRow {
                    uid: mux.uid as i64,
                    kind: "dvb".to_string(),
                    tsid: mux.transport_stream_id() as i64,
                    netid: mux.original_network_id() as i64,
                    pat_version: mux.pat_version() as i64,
                    tuningparams: mux.tuning_params(),
                },
            )
            .await?;
        }

        for service in &dirty_services {
            let row = self.row_from_service(multiplex_uid, service);
            store::upsert_service(&mut tx, &row).await?;

            if service.dirty().contains(DirtyFlags::PIDS) {
                if let Some(program_info) = service.program_info() {
                    let pid_rows: Vec<PidRow> = program_info
                        .streams
                        .iter()
                        .map(|s| PidRow {
                            multiplexuid: multiplex_uid as i64,
                            serviceid: service.uid as i64,
                            pid: s.pid as i64,
                            kind: s.stream_type as i64,
                            subtype: 0,
                            pmtversion: service.pmt_version() as i64,
                            descriptors: crate::psi::descriptors::encode_descriptors(&s.descriptors),
                        })
                        .collect();
                    store::replace_pids(
                        &mut tx,
                        multiplex_uid as i64,
                        service.uid as i64,
                        service.pmt_pid() as i64,
                        service.pcr_pid() as i64,
                        service.pmt_version() as i64,
                        &pid_rows,
                    )
                    .await?;
                }
            }
        }

        tx.commit().await?;

        for service in &dirty_services {
            service.state.lock().dirty = DirtyFlags::empty();
        }
        Ok(())
    }

    fn row_from_service(&self, multiplex_uid: Uid, service: &Shared<Service>) -> ServiceRow {
        let state = service.state.lock();
        ServiceRow {
            multiplexuid: multiplex_uid as i64,
            id: service.uid as i64,
            source: service.source_id as i64,
            ca: state.conditional_access as i64,
            kind: state.kind.into(),
            name: state.name.clone(),
            provider: state.provider.clone(),
            defauthority: state.default_authority.clone(),
            pmtpid: state.pmt_pid as i64,
            pmtversion: state.pmt_version as i64,
            pcrpid: state.pcr_pid as i64,
        }
    }
}

fn program_info_from_rows(rows: &[PidRow], pmt_pid: u16, pcr_pid: u16) -> ProgramInfo {
    let streams = rows
        .iter()
        .filter(|r| r.pid as u16 != pmt_pid && r.pid as u16 != pcr_pid)
        .map(|r| StreamEntry {
            pid: r.pid as u16,
            stream_type: r.kind as u8,
            descriptors: crate::psi::descriptors::parse_descriptors(&r.descriptors).unwrap_or_default(),
        })
        .collect();
    ProgramInfo {
        pcr_pid,
        program_descriptors: Vec::new(),
        streams,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_cache() -> ServiceCache {
        let store = Arc::new(Store::connect_in_memory().await.unwrap());
        ServiceCache::new(store)
    }

    #[tokio::test]
    async fn pat_only_multiplex_two_services() {
        let cache = test_cache().await;
        let mux = Multiplex::new(1, Vec::new());
        cache.load(mux.clone()).await.unwrap();

        let s1 = cache.add(1, 0);
        cache.update_service_pmt_pid(&s1, 0x100);
        let s2 = cache.add(2, 0);
        cache.update_service_pmt_pid(&s2, 0x200);
        cache.update_multiplex(0, 0x1234, None);

        assert_eq!(cache.services().len(), 2);
        assert_eq!(s1.pmt_pid(), 0x100);
        assert_eq!(s2.pmt_pid(), 0x200);
        assert_eq!(mux.pat_version(), 0);
        assert_eq!(mux.transport_stream_id(), 0x1234);
    }

    #[tokio::test]
    async fn service_survives_pat_only_gap_when_sdt_still_lists_it() {
        let cache = test_cache().await;
        let mux = Multiplex::new(1, Vec::new());
        cache.load(mux).await.unwrap();

        let s1 = cache.add(1, 0);
        let s2 = cache.add(2, 0);
        // PAT v1 omits service 2, but SDT still lists it.
        assert!(cache.seen(&s1, true, true));
        assert!(cache.seen(&s2, false, true));
        assert!(cache.seen(&s2, true, false));

        assert_eq!(cache.services().len(), 2);
    }

    #[tokio::test]
    async fn service_deleted_when_both_pat_and_sdt_miss_it() {
        let cache = test_cache().await;
        let mux = Multiplex::new(1, Vec::new());
        cache.load(mux).await.unwrap();

        let s2 = cache.add(2, 0);
        assert!(!cache.seen(&s2, false, true));
        assert!(!cache.seen(&s2, false, false));

        assert_eq!(cache.services().len(), 0);
    }

    #[tokio::test]
    async fn writeback_persists_dirty_services_and_clears_bits() {
        let cache = test_cache().await;
        let mux = Multiplex::new(1, Vec::new());
        cache.load(mux.clone()).await.unwrap();

        let s1 = cache.add(1, 0);
        cache.update_service_name(&s1, "BBC ONE");
        cache.update_service_pmt_pid(&s1, 0x100);
        cache.update_multiplex(0, 0x1234, None);

        cache.writeback().await.unwrap();
        assert!(s1.dirty().is_empty());

        let reloaded = ServiceCache::new(cache.store.clone());
        reloaded.load(mux).await.unwrap();
        assert_eq!(reloaded.services().len(), 1);
        assert_eq!(reloaded.services()[0].name(), "BBC ONE");
    }
}
