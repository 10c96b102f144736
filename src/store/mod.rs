//! # Persistent Store
//!
//! A relational key-value backing for the service/multiplex cache (the EPG
//! store the source also keeps in the same file is out of this crate's core
//! scope — see `spec.md` Non-goals). One SQLite file per adapter,
//! `adapter<N>.db`, matching `spec.md` §6. This module is the only place
//! that names the store's dialect — the rest of the engine calls the typed
//! methods below, per Design Note DN-4.

pub mod models;

use crate::error::Result;
use models::{MultiplexRow, PidRow, ServiceRow, PID_MARKER_PCR_BASE, PID_MARKER_PMT};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqlitePool, SqliteTransaction};
use std::path::Path;
use std::str::FromStr;

/// Embedded schema migrations, run once at [`Store::connect`] time.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Facade over the SQLite-backed cache store.
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if necessary) the database at `path` and runs
    /// pending migrations.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(4).connect_with(options).await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    /// Opens an in-memory database, used by tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    /// Begins a transaction. Callers (the cache's `writeback`) perform
    /// several statements inside it and commit or roll back as a unit.
    pub async fn begin(&self) -> Result<SqliteTransaction<'_>> {
        Ok(self.pool.begin().await?)
    }

    /// Loads every service cached for `multiplex_uid`.
    pub async fn load_services(&self, multiplex_uid: i64) -> Result<Vec<ServiceRow>> {
        let rows = sqlx::query_as::<_, ServiceRow>(
            "SELECT multiplexuid, id, source, ca, type, name, provider, defauthority, pmtpid, pmtversion, pcrpid \
             FROM services WHERE multiplexuid = ?",
        )
        .bind(multiplex_uid)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Loads the PID rows for one service, excluding the synthetic
    /// pmt-pid/pcr-pid marker rows.
    pub async fn load_pids(&self, multiplex_uid: i64, service_id: i64) -> Result<Vec<PidRow>> {
        let rows = sqlx::query_as::<_, PidRow>(
            "SELECT multiplexuid, serviceid, pid, type, subtype, pmtversion, descriptors \
             FROM pids WHERE multiplexuid = ? AND serviceid = ? AND pid != ? AND pid < ? \
             ORDER BY pid",
        )
        .bind(multiplex_uid)
        .bind(service_id)
        .bind(PID_MARKER_PMT)
        .bind(PID_MARKER_PCR_BASE)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Finds a service by name across every cached multiplex, used as the
    /// cache's store-fallback for `find_by_name`.
    pub async fn find_service_by_name(&self, name: &str) -> Result<Option<ServiceRow>> {
        let row = sqlx::query_as::<_, ServiceRow>(
            "SELECT multiplexuid, id, source, ca, type, name, provider, defauthority, pmtpid, pmtversion, pcrpid \
             FROM services WHERE name = ? LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Finds the multiplex row owning `uid`.
    pub async fn find_multiplex(&self, uid: i64) -> Result<Option<MultiplexRow>> {
        let row = sqlx::query_as::<_, MultiplexRow>(
            "SELECT uid, type, tsid, netid, pat_version, tuningparams FROM multiplexes WHERE uid = ?",
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Inserts the multiplex row if absent, then returns its current state.
    pub async fn ensure_multiplex(&self, uid: i64, tsid: i64, netid: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO multiplexes (uid, type, tsid, netid, pat_version, tuningparams) \
             VALUES (?, 'dvb', ?, ?, -1, x'') \
             ON CONFLICT(uid) DO NOTHING",
        )
        .bind(uid)
        .bind(tsid)
        .bind(netid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Upserts a multiplex's mutable fields within a transaction.
pub async fn upsert_multiplex(tx: &mut SqliteTransaction<'_>, row: &MultiplexRow) -> Result<()> {
    sqlx::query(
        "UPDATE multiplexes SET tsid = ?, netid = ?, pat_version = ? WHERE uid = ?",
    )
    .bind(row.tsid)
    .bind(row.netid)
    .bind(row.pat_version)
    .bind(row.uid)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Inserts or updates a service row within a transaction.
pub async fn upsert_service(tx: &mut SqliteTransaction<'_>, row: &ServiceRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO services (multiplexuid, id, source, ca, type, name, provider, defauthority, pmtpid, pmtversion, pcrpid) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(multiplexuid, id) DO UPDATE SET \
            source = excluded.source, ca = excluded.ca, type = excluded.type, \
            name = excluded.name, provider = excluded.provider, defauthority = excluded.defauthority, \
            pmtpid = excluded.pmtpid, pmtversion = excluded.pmtversion, pcrpid = excluded.pcrpid",
    )
    .bind(row.multiplexuid)
    .bind(row.id)
    .bind(row.source)
    .bind(row.ca)
    .bind(row.kind)
    .bind(&row.name)
    .bind(&row.provider)
    .bind(&row.defauthority)
    .bind(row.pmtpid)
    .bind(row.pmtversion)
    .bind(row.pcrpid)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Deletes a service and its PID rows within a transaction.
pub async fn delete_service(tx: &mut SqliteTransaction<'_>, multiplex_uid: i64, service_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM pids WHERE multiplexuid = ? AND serviceid = ?")
        .bind(multiplex_uid)
        .bind(service_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM services WHERE multiplexuid = ? AND id = ?")
        .bind(multiplex_uid)
        .bind(service_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Replaces every PID row for a service (elementary streams plus the
/// synthetic pmt-pid/pcr-pid marker rows) within a transaction.
pub async fn replace_pids(
    tx: &mut SqliteTransaction<'_>,
    multiplex_uid: i64,
    service_id: i64,
    pmt_pid: i64,
    pcr_pid: i64,
    pmt_version: i64,
    streams: &[PidRow],
) -> Result<()> {
    sqlx::query("DELETE FROM pids WHERE multiplexuid = ? AND serviceid = ?")
        .bind(multiplex_uid)
        .bind(service_id)
        .execute(&mut **tx)
        .await?;

    for pid in streams {
        sqlx::query(
            "INSERT INTO pids (multiplexuid, serviceid, pid, type, subtype, pmtversion, descriptors) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(multiplex_uid)
        .bind(service_id)
        .bind(pid.pid)
        .bind(pid.kind)
        .bind(pid.subtype)
        .bind(pmt_version)
        .bind(&pid.descriptors)
        .execute(&mut **tx)
        .await?;
    }

    sqlx::query(
        "INSERT INTO pids (multiplexuid, serviceid, pid, type, subtype, pmtversion, descriptors) \
         VALUES (?, ?, ?, 0, 0, ?, x'')",
    )
    .bind(multiplex_uid)
    .bind(service_id)
    .bind(PID_MARKER_PMT)
    .bind(pmt_version)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "INSERT INTO pids (multiplexuid, serviceid, pid, type, subtype, pmtversion, descriptors) \
         VALUES (?, ?, ?, 0, 0, ?, x'')",
    )
    .bind(multiplex_uid)
    .bind(service_id)
    .bind(PID_MARKER_PCR_BASE | pcr_pid)
    .bind(pmt_version)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_and_roundtrip_service() {
        let store = Store::connect_in_memory().await.unwrap();
        store.ensure_multiplex(1, 0x1234, 0x5678).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        upsert_service(
            &mut tx,
            &ServiceRow {
                multiplexuid: 1,
                id: 10,
                source: 0,
                ca: 0,
                kind: 1,
                name: "BBC ONE".into(),
                provider: "BBC".into(),
                defauthority: String::new(),
                pmtpid: 0x100,
                pmtversion: 0,
                pcrpid: 0x101,
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let services = store.load_services(1).await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "BBC ONE");
    }

    #[tokio::test]
    async fn delete_removes_service_and_pids() {
        let store = Store::connect_in_memory().await.unwrap();
        store.ensure_multiplex(1, 1, 1).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        upsert_service(
            &mut tx,
            &ServiceRow {
                multiplexuid: 1,
                id: 10,
                source: 0,
                ca: 0,
                kind: 1,
                name: "Svc".into(),
                provider: String::new(),
                defauthority: String::new(),
                pmtpid: 0x100,
                pmtversion: 0,
                pcrpid: 0x101,
            },
        )
        .await
        .unwrap();
        replace_pids(&mut tx, 1, 10, 0x100, 0x101, 0, &[]).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        delete_service(&mut tx, 1, 10).await.unwrap();
        tx.commit().await.unwrap();

        assert!(store.load_services(1).await.unwrap().is_empty());
    }
}
