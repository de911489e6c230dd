//! Appshelf persistence: SQLite-backed catalog store.
//! One row per application; the record itself is kept as JSON next to the columns queries filter on.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use appshelf_core::{ApplicationRecord, RevisionMarker};
use appshelf_store::{CatalogStore, Page, RecordFilter, RecordUpdate, TopFilter, TopItem};
use metrics::histogram;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::debug;

pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        let started = Instant::now();
        let db = Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                name             TEXT PRIMARY KEY,
                id               TEXT NOT NULL,
                last_commit_hash TEXT NOT NULL,
                cfg_type         TEXT NOT NULL,
                update_time      INTEGER NOT NULL,
                labels           TEXT NOT NULL,
                categories       TEXT NOT NULL,
                doc              TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_records_recency ON records(update_time DESC, name ASC);
            CREATE TABLE IF NOT EXISTS counters (
                name  TEXT PRIMARY KEY,
                count INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS revision (
                id          INTEGER PRIMARY KEY CHECK (id = 1),
                hash        TEXT NOT NULL,
                observed_at TEXT NOT NULL
            );",
        )
        .context("creating catalog tables")?;
        let me = Self { db: Arc::new(Mutex::new(db)) };
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(me)
    }

    /// Run `f` on the blocking pool with the connection locked.
    async fn with_db<T, F>(&self, metric: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let started = Instant::now();
        let out = tokio::task::spawn_blocking(move || {
            let mut conn = db.lock().map_err(|_| anyhow!("sqlite connection lock poisoned"))?;
            f(&mut conn)
        })
        .await
        .context("sqlite task failed")??;
        histogram!(metric, started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }
}

fn decode(doc: &str) -> Result<ApplicationRecord> { serde_json::from_str(doc).context("decoding stored record") }

fn placeholders(n: usize) -> String { vec!["?"; n].join(",") }

// WHERE clause over `records` (aliased `r`) plus its bound values.
fn where_clause(filter: &RecordFilter, exclude_labels: &[String]) -> (String, Vec<Value>) {
    let mut conds: Vec<String> = Vec::new();
    let mut vals: Vec<Value> = Vec::new();
    if let Some(rev) = &filter.revision {
        conds.push("r.last_commit_hash = ?".into());
        vals.push(Value::Text(rev.clone()));
    }
    if let Some(cat) = &filter.category {
        conds.push("EXISTS (SELECT 1 FROM json_each(r.categories) jc WHERE lower(jc.value) = lower(?))".into());
        vals.push(Value::Text(cat.clone()));
    }
    if !filter.types.is_empty() {
        conds.push(format!("r.cfg_type IN ({})", placeholders(filter.types.len())));
        vals.extend(filter.types.iter().cloned().map(Value::Text));
    }
    if !exclude_labels.is_empty() {
        conds.push(format!("NOT EXISTS (SELECT 1 FROM json_each(r.labels) jl WHERE jl.value IN ({}))", placeholders(exclude_labels.len())));
        vals.extend(exclude_labels.iter().cloned().map(Value::Text));
    }
    if conds.is_empty() { return (String::new(), vals); }
    (format!(" WHERE {}", conds.join(" AND ")), vals)
}

#[async_trait::async_trait]
impl CatalogStore for SqliteStore {
    async fn find(&self, name: &str) -> Result<Option<ApplicationRecord>> {
        let name = name.to_string();
        self.with_db("persist_find_ms", move |db| {
            let doc: Option<String> = db.query_row("SELECT doc FROM records WHERE name = ?1", [&name], |r| r.get(0)).optional()?;
            doc.as_deref().map(decode).transpose()
        })
        .await
    }

    async fn find_many(&self, names: &[String]) -> Result<Vec<ApplicationRecord>> {
        if names.is_empty() { return Ok(Vec::new()); }
        let names = names.to_vec();
        self.with_db("persist_find_ms", move |db| {
            let sql = format!("SELECT doc FROM records WHERE name IN ({}) ORDER BY name", placeholders(names.len()));
            let mut stmt = db.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(names.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let doc: String = row.get(0)?;
                out.push(decode(&doc)?);
            }
            Ok(out)
        })
        .await
    }

    async fn upsert(&self, update: RecordUpdate) -> Result<()> {
        self.with_db("persist_upsert_ms", move |db| {
            let tx = db.transaction()?;
            let existing: Option<String> =
                tx.query_row("SELECT doc FROM records WHERE name = ?1", [&update.name], |r| r.get(0)).optional()?;
            let existing = existing.as_deref().map(decode).transpose()?;
            let rec = update.apply(existing);
            let latest = rec.latest().cloned().unwrap_or_default();
            tx.execute(
                "INSERT OR REPLACE INTO records(name, id, last_commit_hash, cfg_type, update_time, labels, categories, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    rec.name,
                    rec.id,
                    latest.last_commit_hash,
                    latest.cfg_type,
                    latest.update_time,
                    serde_json::to_string(&rec.app_labels)?,
                    serde_json::to_string(&latest.categories)?,
                    serde_json::to_string(&rec)?,
                ],
            )?;
            tx.commit()?;
            debug!(app = %rec.name, "persist: upserted");
            Ok(())
        })
        .await
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.with_db("persist_delete_ms", move |db| Ok(db.execute("DELETE FROM records WHERE name = ?1", [&name])? > 0)).await
    }

    async fn paginate(&self, filter: &RecordFilter, skip: usize, limit: usize) -> Result<Page> {
        let (clause, vals) = where_clause(filter, &[]);
        self.with_db("persist_page_ms", move |db| {
            let total: i64 = db.query_row(&format!("SELECT COUNT(*) FROM records r{clause}"), params_from_iter(vals.iter()), |r| r.get(0))?;
            let sql = format!("SELECT r.doc FROM records r{clause} ORDER BY r.update_time DESC, r.name ASC LIMIT ? OFFSET ?");
            let mut bound = vals;
            bound.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
            bound.push(Value::Integer(i64::try_from(skip).unwrap_or(i64::MAX)));
            let mut stmt = db.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(bound.iter()))?;
            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                let doc: String = row.get(0)?;
                items.push(decode(&doc)?);
            }
            Ok(Page { items, total: total as u64 })
        })
        .await
    }

    async fn top(&self, filter: &TopFilter, limit: usize) -> Result<Vec<TopItem>> {
        let (clause, vals) = where_clause(&filter.base, &filter.exclude_labels);
        self.with_db("persist_top_ms", move |db| {
            let sql = format!(
                "SELECT r.doc, COALESCE(c.count, 0) AS cnt FROM records r LEFT JOIN counters c ON c.name = r.name{clause}
                 ORDER BY cnt DESC, r.update_time DESC, r.name ASC LIMIT ?"
            );
            let mut bound = vals;
            bound.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
            let mut stmt = db.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(bound.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let doc: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                out.push(TopItem { record: decode(&doc)?, count: count.max(0) as u64 });
            }
            Ok(out)
        })
        .await
    }

    async fn types(&self) -> Result<Vec<String>> {
        self.with_db("persist_types_ms", |db| {
            let mut stmt = db.prepare("SELECT DISTINCT cfg_type FROM records WHERE cfg_type != '' ORDER BY cfg_type")?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn init_counter(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.with_db("persist_counter_ms", move |db| {
            db.execute("INSERT OR IGNORE INTO counters(name, count) VALUES (?1, 0)", [&name])?;
            Ok(())
        })
        .await
    }

    async fn increment(&self, name: &str) -> Result<u64> {
        let name = name.to_string();
        self.with_db("persist_counter_ms", move |db| {
            let tx = db.transaction()?;
            tx.execute(
                "INSERT INTO counters(name, count) VALUES (?1, 1) ON CONFLICT(name) DO UPDATE SET count = count + 1",
                [&name],
            )?;
            let n: i64 = tx.query_row("SELECT count FROM counters WHERE name = ?1", [&name], |r| r.get(0))?;
            tx.commit()?;
            Ok(n.max(0) as u64)
        })
        .await
    }

    async fn counter(&self, name: &str) -> Result<u64> {
        let name = name.to_string();
        self.with_db("persist_counter_ms", move |db| {
            let n: Option<i64> = db.query_row("SELECT count FROM counters WHERE name = ?1", [&name], |r| r.get(0)).optional()?;
            Ok(n.unwrap_or(0).max(0) as u64)
        })
        .await
    }

    async fn revision(&self) -> Result<Option<RevisionMarker>> {
        self.with_db("persist_revision_ms", |db| {
            let m = db
                .query_row("SELECT hash, observed_at FROM revision WHERE id = 1", [], |r| {
                    Ok(RevisionMarker { hash: r.get(0)?, observed_at: r.get(1)? })
                })
                .optional()?;
            Ok(m)
        })
        .await
    }

    async fn set_revision(&self, marker: RevisionMarker) -> Result<()> {
        self.with_db("persist_revision_ms", move |db| {
            db.execute(
                "INSERT INTO revision(id, hash, observed_at) VALUES (1, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET hash = excluded.hash, observed_at = excluded.observed_at",
                params![marker.hash, marker.observed_at],
            )?;
            Ok(())
        })
        .await
    }
}
