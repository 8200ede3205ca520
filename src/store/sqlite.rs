//! SQLite-backed store.
//!
//! Rows keep the full record as a JSON `data` column plus the handful of
//! columns queries actually filter on. Connections are opened per call;
//! WAL mode and a busy timeout make that safe under the scheduler's
//! concurrency.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::models::{Nodo, RunStatus, ScrapeRun, SourceConfig, TenderRecord};

use super::{parse_datetime, parse_datetime_opt, Result, TenderStore};

pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn new(db_path: &Path) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(10))?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tenders (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                estado TEXT NOT NULL,
                merged_into TEXT,
                first_seen_at TEXT NOT NULL,
                fecha_scraping TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tenders_source_hash
                ON tenders (source_id, content_hash);
            CREATE INDEX IF NOT EXISTS idx_tenders_estado ON tenders (estado);

            CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                active INTEGER NOT NULL,
                last_run_at TEXT,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                status TEXT NOT NULL,
                found INTEGER NOT NULL,
                saved INTEGER NOT NULL,
                updated INTEGER NOT NULL,
                duplicates INTEGER NOT NULL,
                errors TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_runs_source ON runs (source_id, started_at);

            CREATE TABLE IF NOT EXISTS nodos (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                keywords TEXT NOT NULL,
                active INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
        )?;
        Ok(())
    }
}

fn tender_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<String> {
    row.get("data")
}

fn decode_tender(data: String) -> Result<TenderRecord> {
    Ok(serde_json::from_str(&data)?)
}

fn upsert_tender_stmt(conn: &Connection, record: &TenderRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO tenders (id, source_id, content_hash, estado, merged_into,
                             first_seen_at, fecha_scraping, data)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(id) DO UPDATE SET
            source_id = excluded.source_id,
            content_hash = excluded.content_hash,
            estado = excluded.estado,
            merged_into = excluded.merged_into,
            fecha_scraping = excluded.fecha_scraping,
            data = excluded.data
        "#,
        params![
            record.id,
            record.source_id,
            record.content_hash,
            record.estado.as_str(),
            record.merged_into,
            record.first_seen_at.to_rfc3339(),
            record.fecha_scraping.to_rfc3339(),
            serde_json::to_string(record)?,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl TenderStore for SqliteStore {
    async fn get_tender(&self, id: &str) -> Result<Option<TenderRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT data FROM tenders WHERE id = ?")?;
        match stmt.query_row(params![id], tender_row) {
            Ok(data) => Ok(Some(decode_tender(data)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn tenders_by_hash(&self, source_id: &str) -> Result<HashMap<String, TenderRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT data FROM tenders WHERE source_id = ? AND merged_into IS NULL",
        )?;
        let rows = stmt.query_map(params![source_id], tender_row)?;

        let mut map = HashMap::new();
        for data in rows {
            let record = decode_tender(data?)?;
            map.insert(record.content_hash.clone(), record);
        }
        Ok(map)
    }

    async fn upsert_tender(&self, record: &TenderRecord) -> Result<()> {
        let conn = self.connect()?;
        upsert_tender_stmt(&conn, record)
    }

    async fn bulk_upsert(&self, records: &[TenderRecord]) -> Result<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        for record in records {
            upsert_tender_stmt(&tx, record)?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    async fn all_tenders(&self) -> Result<Vec<TenderRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT data FROM tenders")?;
        let rows = stmt.query_map([], tender_row)?;
        let mut tenders = Vec::new();
        for data in rows {
            tenders.push(decode_tender(data?)?);
        }
        Ok(tenders)
    }

    async fn get_source(&self, id: &str) -> Result<Option<SourceConfig>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT data FROM sources WHERE id = ?")?;
        match stmt.query_row(params![id], |row| row.get::<_, String>("data")) {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn all_sources(&self) -> Result<Vec<SourceConfig>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT data FROM sources ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>("data"))?;
        let mut sources = Vec::new();
        for data in rows {
            sources.push(serde_json::from_str(&data?)?);
        }
        Ok(sources)
    }

    async fn upsert_source(&self, source: &SourceConfig) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO sources (id, name, active, last_run_at, data)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                active = excluded.active,
                last_run_at = excluded.last_run_at,
                data = excluded.data
            "#,
            params![
                source.id,
                source.name,
                source.active,
                source.last_run_at.map(|dt| dt.to_rfc3339()),
                serde_json::to_string(source)?,
            ],
        )?;
        Ok(())
    }

    async fn delete_source(&self, id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let rows = conn.execute("DELETE FROM sources WHERE id = ?", params![id])?;
        Ok(rows > 0)
    }

    async fn record_run(&self, run: &ScrapeRun) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO runs (id, source_id, status, found, saved, updated,
                              duplicates, errors, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                found = excluded.found,
                saved = excluded.saved,
                updated = excluded.updated,
                duplicates = excluded.duplicates,
                errors = excluded.errors,
                finished_at = excluded.finished_at
            "#,
            params![
                run.id,
                run.source_id,
                run.status.as_str(),
                run.counts.found,
                run.counts.saved,
                run.counts.updated,
                run.counts.duplicates,
                serde_json::to_string(&run.errors)?,
                run.started_at.to_rfc3339(),
                run.finished_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    async fn runs(
        &self,
        source_id: Option<&str>,
        status: Option<RunStatus>,
        limit: usize,
    ) -> Result<Vec<ScrapeRun>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM runs
            WHERE (?1 IS NULL OR source_id = ?1)
              AND (?2 IS NULL OR status = ?2)
            ORDER BY started_at DESC
            LIMIT ?3
            "#,
        )?;

        let rows = stmt.query_map(
            params![source_id, status.map(|s| s.as_str()), limit as i64],
            |row| {
                Ok((
                    row.get::<_, String>("id")?,
                    row.get::<_, String>("source_id")?,
                    row.get::<_, String>("status")?,
                    row.get::<_, u32>("found")?,
                    row.get::<_, u32>("saved")?,
                    row.get::<_, u32>("updated")?,
                    row.get::<_, u32>("duplicates")?,
                    row.get::<_, String>("errors")?,
                    row.get::<_, String>("started_at")?,
                    row.get::<_, Option<String>>("finished_at")?,
                ))
            },
        )?;

        let mut runs = Vec::new();
        for row in rows {
            let (id, source_id, status, found, saved, updated, duplicates, errors, started, finished) =
                row?;
            runs.push(ScrapeRun {
                id,
                source_id,
                status: RunStatus::parse(&status).unwrap_or(RunStatus::Orphaned),
                counts: crate::models::RunCounts {
                    found,
                    saved,
                    updated,
                    duplicates,
                },
                errors: serde_json::from_str(&errors).unwrap_or_default(),
                started_at: parse_datetime(&started),
                finished_at: parse_datetime_opt(finished),
            });
        }
        Ok(runs)
    }

    async fn sweep_orphan_runs(&self, started_before: DateTime<Utc>) -> Result<usize> {
        let conn = self.connect()?;
        let swept = conn.execute(
            "UPDATE runs SET status = 'orphaned', finished_at = ?1
             WHERE status = 'running' AND started_at < ?2",
            params![Utc::now().to_rfc3339(), started_before.to_rfc3339()],
        )?;
        Ok(swept)
    }

    async fn get_nodo(&self, id: &str) -> Result<Option<Nodo>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM nodos WHERE id = ?")?;
        match stmt.query_row(params![id], nodo_from_row) {
            Ok(nodo) => Ok(Some(nodo)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn all_nodos(&self) -> Result<Vec<Nodo>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM nodos ORDER BY id")?;
        let nodos = stmt
            .query_map([], nodo_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodos)
    }

    async fn upsert_nodo(&self, nodo: &Nodo) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO nodos (id, name, keywords, active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                keywords = excluded.keywords,
                active = excluded.active,
                updated_at = excluded.updated_at
            "#,
            params![
                nodo.id,
                nodo.name,
                serde_json::to_string(&nodo.keywords)?,
                nodo.active,
                nodo.created_at.to_rfc3339(),
                nodo.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn delete_nodo(&self, id: &str) -> Result<bool> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let existed = tx.execute("DELETE FROM nodos WHERE id = ?", params![id])? > 0;
        if existed {
            // Membership shrink on group deletion. Records are stored as
            // JSON, so rewrite the ones that carried the tag.
            let touched: Vec<TenderRecord> = {
                let mut stmt = tx.prepare("SELECT data FROM tenders")?;
                let rows = stmt.query_map([], tender_row)?;
                let mut touched = Vec::new();
                for data in rows {
                    let mut record = decode_tender(data?)?;
                    if record.nodos.remove(id) {
                        touched.push(record);
                    }
                }
                touched
            };
            for record in &touched {
                upsert_tender_stmt(&tx, record)?;
            }
        }
        tx.commit()?;
        Ok(existed)
    }
}

fn nodo_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Nodo> {
    Ok(Nodo {
        id: row.get("id")?,
        name: row.get("name")?,
        keywords: serde_json::from_str(&row.get::<_, String>("keywords")?).unwrap_or_default(),
        active: row.get("active")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(&row.get::<_, String>("updated_at")?),
    })
}
