//! Persistence surface for synced shapes and historical count totals.
//!
//! The console does not own the backing store's semantics; it writes the
//! edge device's full-sync snapshots and reads cumulative totals predating the
//! current edge run. Shapes here are in sensor space.

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::coords::SensorPoint;
use crate::counts::{CountKey, CumulativeTotals};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedZone {
    pub zone: u8,
    pub top_left: SensorPoint,
    pub bottom_right: SensorPoint,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedLine {
    pub line_name: String,
    pub start: SensorPoint,
    pub end: SensorPoint,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ZoneSync {
    Bare(Vec<SyncedZone>),
    Wrapped { zones: Vec<SyncedZone> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LineSync {
    Bare(Vec<SyncedLine>),
    Wrapped { lines: Vec<SyncedLine> },
}

/// `[{zone, top_left, bottom_right}]` or `{"zones": [...]}`.
pub fn parse_zone_sync(payload: &[u8]) -> Result<Vec<SyncedZone>> {
    let zones = match serde_json::from_slice::<ZoneSync>(payload)
        .context("invalid zone full-sync payload")?
    {
        ZoneSync::Bare(zones) | ZoneSync::Wrapped { zones } => zones,
    };
    Ok(zones)
}

/// `[{line_name, start, end}]` or `{"lines": [...]}`.
pub fn parse_line_sync(payload: &[u8]) -> Result<Vec<SyncedLine>> {
    let lines = match serde_json::from_slice::<LineSync>(payload)
        .context("invalid line full-sync payload")?
    {
        LineSync::Bare(lines) | LineSync::Wrapped { lines } => lines,
    };
    Ok(lines)
}

pub trait ShapeStore {
    /// Replace every stored zone for `camera_id`.
    fn write_zones(&mut self, camera_id: &str, zones: &[SyncedZone]) -> Result<()>;

    /// Replace every stored line for `camera_id`.
    fn write_lines(&mut self, camera_id: &str, lines: &[SyncedLine]) -> Result<()>;

    fn zones(&self, camera_id: &str) -> Result<Vec<SyncedZone>>;

    fn lines(&self, camera_id: &str) -> Result<Vec<SyncedLine>>;

    fn cumulative_totals(&self, camera_id: &str) -> Result<BTreeMap<CountKey, CumulativeTotals>>;

    /// Add to the persisted totals for one zone or line.
    fn record_totals(&mut self, camera_id: &str, key: &CountKey, entered: i64, exited: i64) -> Result<()>;
}

pub struct SqliteShapeStore {
    conn: Connection,
}

impl SqliteShapeStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open shape store {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS zones (
              camera_id TEXT NOT NULL,
              zone_id INTEGER NOT NULL,
              x1 INTEGER NOT NULL,
              y1 INTEGER NOT NULL,
              x2 INTEGER NOT NULL,
              y2 INTEGER NOT NULL,
              PRIMARY KEY (camera_id, zone_id)
            );

            CREATE TABLE IF NOT EXISTS lines (
              camera_id TEXT NOT NULL,
              line_name TEXT NOT NULL,
              x1 INTEGER NOT NULL,
              y1 INTEGER NOT NULL,
              x2 INTEGER NOT NULL,
              y2 INTEGER NOT NULL,
              PRIMARY KEY (camera_id, line_name)
            );

            CREATE TABLE IF NOT EXISTS count_totals (
              camera_id TEXT NOT NULL,
              count_key TEXT NOT NULL,
              total_in INTEGER NOT NULL,
              total_out INTEGER NOT NULL,
              PRIMARY KEY (camera_id, count_key)
            );
            "#,
        )?;
        Ok(())
    }
}

impl ShapeStore for SqliteShapeStore {
    fn write_zones(&mut self, camera_id: &str, zones: &[SyncedZone]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM zones WHERE camera_id = ?1", params![camera_id])?;
        for z in zones {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO zones(camera_id, zone_id, x1, y1, x2, y2)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    camera_id,
                    z.zone,
                    z.top_left[0],
                    z.top_left[1],
                    z.bottom_right[0],
                    z.bottom_right[1]
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn write_lines(&mut self, camera_id: &str, lines: &[SyncedLine]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM lines WHERE camera_id = ?1", params![camera_id])?;
        for l in lines {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO lines(camera_id, line_name, x1, y1, x2, y2)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![camera_id, l.line_name, l.start[0], l.start[1], l.end[0], l.end[1]],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn zones(&self, camera_id: &str) -> Result<Vec<SyncedZone>> {
        let mut stmt = self.conn.prepare(
            "SELECT zone_id, x1, y1, x2, y2 FROM zones WHERE camera_id = ?1 ORDER BY zone_id",
        )?;
        let rows = stmt.query_map(params![camera_id], |row| {
            Ok(SyncedZone {
                zone: row.get(0)?,
                top_left: [row.get(1)?, row.get(2)?],
                bottom_right: [row.get(3)?, row.get(4)?],
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn lines(&self, camera_id: &str) -> Result<Vec<SyncedLine>> {
        let mut stmt = self.conn.prepare(
            "SELECT line_name, x1, y1, x2, y2 FROM lines WHERE camera_id = ?1 ORDER BY line_name",
        )?;
        let rows = stmt.query_map(params![camera_id], |row| {
            Ok(SyncedLine {
                line_name: row.get(0)?,
                start: [row.get(1)?, row.get(2)?],
                end: [row.get(3)?, row.get(4)?],
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn cumulative_totals(&self, camera_id: &str) -> Result<BTreeMap<CountKey, CumulativeTotals>> {
        let mut stmt = self.conn.prepare(
            "SELECT count_key, total_in, total_out FROM count_totals WHERE camera_id = ?1",
        )?;
        let mut rows = stmt.query(params![camera_id])?;
        let mut out = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            let key = CountKey::parse(&raw)
                .ok_or_else(|| anyhow!("corrupt count_totals row: key '{}'", raw))?;
            out.insert(
                key,
                CumulativeTotals {
                    total_in: row.get(1)?,
                    total_out: row.get(2)?,
                },
            );
        }
        Ok(out)
    }

    fn record_totals(&mut self, camera_id: &str, key: &CountKey, entered: i64, exited: i64) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO count_totals(camera_id, count_key, total_in, total_out)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(camera_id, count_key) DO UPDATE SET
              total_in = total_in + excluded.total_in,
              total_out = total_out + excluded.total_out
            "#,
            params![camera_id, key.to_string(), entered, exited],
        )?;
        Ok(())
    }
}

/// Map-backed store for tests and runs without a database.
#[derive(Clone, Debug, Default)]
pub struct InMemoryShapeStore {
    zones: BTreeMap<String, Vec<SyncedZone>>,
    lines: BTreeMap<String, Vec<SyncedLine>>,
    totals: BTreeMap<(String, CountKey), CumulativeTotals>,
}

impl InMemoryShapeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShapeStore for InMemoryShapeStore {
    fn write_zones(&mut self, camera_id: &str, zones: &[SyncedZone]) -> Result<()> {
        self.zones.insert(camera_id.to_string(), zones.to_vec());
        Ok(())
    }

    fn write_lines(&mut self, camera_id: &str, lines: &[SyncedLine]) -> Result<()> {
        self.lines.insert(camera_id.to_string(), lines.to_vec());
        Ok(())
    }

    fn zones(&self, camera_id: &str) -> Result<Vec<SyncedZone>> {
        Ok(self.zones.get(camera_id).cloned().unwrap_or_default())
    }

    fn lines(&self, camera_id: &str) -> Result<Vec<SyncedLine>> {
        Ok(self.lines.get(camera_id).cloned().unwrap_or_default())
    }

    fn cumulative_totals(&self, camera_id: &str) -> Result<BTreeMap<CountKey, CumulativeTotals>> {
        Ok(self
            .totals
            .iter()
            .filter(|((cam, _), _)| cam == camera_id)
            .map(|((_, key), t)| (key.clone(), *t))
            .collect())
    }

    fn record_totals(&mut self, camera_id: &str, key: &CountKey, entered: i64, exited: i64) -> Result<()> {
        let t = self
            .totals
            .entry((camera_id.to_string(), key.clone()))
            .or_default();
        t.total_in = t.total_in.saturating_add(entered);
        t.total_out = t.total_out.saturating_add(exited);
        Ok(())
    }
}
