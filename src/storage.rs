use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// A recorded weapon alert.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: i64,
    pub timestamp: String,
    pub weapon_type: String,
    pub location: String,
    /// Relative screenshot path, or empty when none was saved.
    pub screenshot: String,
    pub confidence: f32,
}

/// Record contents before the store assigns an id.
#[derive(Clone, Debug, PartialEq)]
pub struct NewDetection {
    pub timestamp: String,
    pub weapon_type: String,
    pub location: String,
    pub screenshot: String,
    pub confidence: f32,
}

impl NewDetection {
    fn into_record(self, id: i64) -> DetectionRecord {
        DetectionRecord {
            id,
            timestamp: self.timestamp,
            weapon_type: self.weapon_type,
            location: self.location,
            screenshot: self.screenshot,
            confidence: self.confidence,
        }
    }
}

pub trait HistoryStore: Send {
    fn append(&mut self, detection: NewDetection) -> Result<DetectionRecord>;

    /// Most recent first.
    fn list(&mut self, limit: Option<usize>) -> Result<Vec<DetectionRecord>>;

    fn total(&mut self) -> Result<usize>;

    /// `(weapon_type, count)`, highest count first, ties by name.
    fn distribution(&mut self) -> Result<Vec<(String, usize)>>;
}

pub struct SqliteHistoryStore {
    conn: Connection,
}

impl SqliteHistoryStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open history database {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS detections (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp TEXT NOT NULL,
              weapon_type TEXT NOT NULL,
              location TEXT NOT NULL,
              screenshot TEXT NOT NULL DEFAULT '',
              confidence REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_detections_timestamp ON detections(timestamp);
            "#,
        )?;
        Ok(())
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn append(&mut self, detection: NewDetection) -> Result<DetectionRecord> {
        self.conn.execute(
            "INSERT INTO detections(timestamp, weapon_type, location, screenshot, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                detection.timestamp,
                detection.weapon_type,
                detection.location,
                detection.screenshot,
                f64::from(detection.confidence)
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(detection.into_record(id))
    }

    fn list(&mut self, limit: Option<usize>) -> Result<Vec<DetectionRecord>> {
        let limit = match limit {
            Some(limit) => {
                i64::try_from(limit).map_err(|_| anyhow!("history limit exceeds i64 range"))?
            }
            None => -1,
        };
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, weapon_type, location, screenshot, confidence
             FROM detections ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            let confidence: f64 = row.get(5)?;
            Ok(DetectionRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                weapon_type: row.get(2)?,
                location: row.get(3)?,
                screenshot: row.get(4)?,
                confidence: confidence as f32,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn total(&mut self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM detections", [], |row| row.get(0))?;
        usize::try_from(count).map_err(|_| anyhow!("negative detection count"))
    }

    fn distribution(&mut self) -> Result<Vec<(String, usize)>> {
        let mut stmt = self.conn.prepare(
            "SELECT weapon_type, COUNT(*) AS n FROM detections
             GROUP BY weapon_type ORDER BY n DESC, weapon_type ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let name: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((name, count))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (name, count) = row?;
            let count = usize::try_from(count).map_err(|_| anyhow!("negative detection count"))?;
            out.push((name, count));
        }
        Ok(out)
    }
}

/// Bounded in-memory history. Newest at the head, oldest evicted first.
pub struct InMemoryHistoryStore {
    records: VecDeque<DetectionRecord>,
    capacity: usize,
    next_id: i64,
}

impl InMemoryHistoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn append(&mut self, detection: NewDetection) -> Result<DetectionRecord> {
        let record = detection.into_record(self.next_id);
        self.next_id += 1;
        self.records.push_front(record.clone());
        self.records.truncate(self.capacity);
        Ok(record)
    }

    fn list(&mut self, limit: Option<usize>) -> Result<Vec<DetectionRecord>> {
        let limit = limit.unwrap_or(self.records.len());
        Ok(self.records.iter().take(limit).cloned().collect())
    }

    fn total(&mut self) -> Result<usize> {
        Ok(self.records.len())
    }

    fn distribution(&mut self) -> Result<Vec<(String, usize)>> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for record in &self.records {
            match counts.iter_mut().find(|(name, _)| *name == record.weapon_type) {
                Some((_, count)) => *count += 1,
                None => counts.push((record.weapon_type.clone(), 1)),
            }
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(counts)
    }
}

/// Shared history. Every read and write goes through the one lock.
pub struct DetectionHistory {
    store: Mutex<Box<dyn HistoryStore>>,
}

impl DetectionHistory {
    pub fn new(store: Box<dyn HistoryStore>) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    pub fn in_memory(capacity: usize) -> Self {
        Self::new(Box::new(InMemoryHistoryStore::new(capacity)))
    }

    fn with_store<T>(&self, f: impl FnOnce(&mut dyn HistoryStore) -> Result<T>) -> Result<T> {
        let mut store = self
            .store
            .lock()
            .map_err(|_| anyhow!("history lock poisoned"))?;
        f(store.as_mut())
    }

    pub fn append(&self, detection: NewDetection) -> Result<DetectionRecord> {
        self.with_store(|store| store.append(detection))
    }

    pub fn list(&self, limit: Option<usize>) -> Result<Vec<DetectionRecord>> {
        self.with_store(|store| store.list(limit))
    }

    pub fn total(&self) -> Result<usize> {
        self.with_store(|store| store.total())
    }

    pub fn distribution(&self) -> Result<Vec<(String, usize)>> {
        self.with_store(|store| store.distribution())
    }
}
