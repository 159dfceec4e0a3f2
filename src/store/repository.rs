//! Durable copy of the people collection.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use serde::Deserialize;
use serde_json::Value;

use crate::person::{PersonDescriptor, PersonMetadata, PersonRecord};

pub trait PeopleRepository: Send {
    fn describe(&self) -> String;

    /// Every stored record, oldest first.
    fn read_all(&mut self) -> Result<Vec<PersonRecord>>;

    /// Insert a record, or replace the stored copy with the same id.
    fn append(&mut self, record: &PersonRecord) -> Result<()>;
}

pub struct SqlitePeopleRepository {
    conn: Connection,
    path: String,
}

impl SqlitePeopleRepository {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open people database {}", db_path))?;
        let mut repo = Self {
            conn,
            path: db_path.to_string(),
        };
        repo.ensure_schema()?;
        Ok(repo)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS people (
              seq INTEGER PRIMARY KEY AUTOINCREMENT,
              id TEXT NOT NULL UNIQUE,
              created_at INTEGER NOT NULL,
              updated_at INTEGER NOT NULL,
              payload_json TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl PeopleRepository for SqlitePeopleRepository {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.path)
    }

    fn read_all(&mut self) -> Result<Vec<PersonRecord>> {
        let payloads = {
            let mut stmt = self
                .conn
                .prepare("SELECT id, payload_json FROM people ORDER BY seq ASC")?;
            let mut rows = stmt.query([])?;
            let mut payloads = Vec::new();
            while let Some(row) = rows.next()? {
                let id: String = row.get(0)?;
                let payload: String = row.get(1)?;
                payloads.push((id, payload));
            }
            payloads
        };

        let mut out = Vec::with_capacity(payloads.len());
        for (id, payload) in payloads {
            match serde_json::from_str::<PersonRecord>(&payload) {
                Ok(record) => out.push(record),
                Err(e) => log::warn!("skipping unreadable person row: id={} err={}", id, e),
            }
        }
        Ok(out)
    }

    fn append(&mut self, record: &PersonRecord) -> Result<()> {
        let timestamp = i64::try_from(record.metadata.timestamp_ms)
            .map_err(|_| anyhow!("timestamp exceeds i64 range"))?;
        let payload_json = serde_json::to_string(record)?;
        self.conn.execute(
            r#"
            INSERT INTO people(id, created_at, updated_at, payload_json)
            VALUES (?1, ?2, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
              updated_at = excluded.updated_at,
              payload_json = excluded.payload_json
            "#,
            params![record.id, timestamp, payload_json],
        )?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryPeopleRepository {
    records: Vec<PersonRecord>,
}

impl InMemoryPeopleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PeopleRepository for InMemoryPeopleRepository {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn read_all(&mut self) -> Result<Vec<PersonRecord>> {
        Ok(self.records.clone())
    }

    fn append(&mut self, record: &PersonRecord) -> Result<()> {
        match self.records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => self.records.push(record.clone()),
        }
        Ok(())
    }
}

/// Read-only static JSON export of the people collection.
///
/// Accepts a top-level array or `{"people": [...]}`. Entries may omit `id`
/// (one is derived from the position) and may carry nested descriptions,
/// which are flattened.
pub struct SnapshotRepository {
    path: PathBuf,
}

#[derive(Deserialize)]
struct SnapshotEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    descriptor: Value,
    metadata: PersonMetadata,
    #[serde(default)]
    crop: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    List(Vec<SnapshotEntry>),
    Wrapped { people: Vec<SnapshotEntry> },
}

impl SnapshotRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PeopleRepository for SnapshotRepository {
    fn describe(&self) -> String {
        format!("snapshot:{}", self.path.display())
    }

    fn read_all(&mut self) -> Result<Vec<PersonRecord>> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read snapshot {}", self.path.display()))?;
        let file: SnapshotFile = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse snapshot {}", self.path.display()))?;
        let entries = match file {
            SnapshotFile::List(entries) => entries,
            SnapshotFile::Wrapped { people } => people,
        };
        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| PersonRecord {
                id: entry
                    .id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| format!("snapshot-{}", index)),
                descriptor: PersonDescriptor::from_json(&entry.descriptor).unwrap_or_default(),
                metadata: entry.metadata,
                crop: entry.crop,
            })
            .collect())
    }

    fn append(&mut self, _record: &PersonRecord) -> Result<()> {
        Err(anyhow!(
            "snapshot repository is read-only: {}",
            self.path.display()
        ))
    }
}

/// Read the people collection, falling back to the static snapshot when the
/// primary repository is missing or unreachable.
pub fn load_people(
    primary: Option<&mut dyn PeopleRepository>,
    snapshot: Option<&mut SnapshotRepository>,
) -> Result<Vec<PersonRecord>> {
    let primary_error = match primary {
        Some(repo) => match repo.read_all() {
            Ok(records) => {
                log::info!("loaded {} person record(s) from {}", records.len(), repo.describe());
                return Ok(records);
            }
            Err(e) => {
                log::warn!("people repository {} unreachable: {:#}", repo.describe(), e);
                Some(e)
            }
        },
        None => None,
    };

    match (snapshot, primary_error) {
        (Some(snapshot), _) => {
            let records = snapshot.read_all()?;
            log::info!(
                "loaded {} person record(s) from fallback {}",
                records.len(),
                snapshot.describe()
            );
            Ok(records)
        }
        (None, Some(e)) => Err(e.context("no snapshot configured")),
        (None, None) => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::person::PersonDescriptor;
    use std::io::Write;

    fn record(id: &str, gender: &str) -> PersonRecord {
        PersonRecord {
            id: id.to_string(),
            descriptor: PersonDescriptor::new().with("gender", gender),
            metadata: PersonMetadata::new("cam-1", 1_700_000_000_000),
            crop: None,
        }
    }

    struct Unreachable;

    impl PeopleRepository for Unreachable {
        fn describe(&self) -> String {
            "unreachable".to_string()
        }

        fn read_all(&mut self) -> Result<Vec<PersonRecord>> {
            Err(anyhow!("connection refused"))
        }

        fn append(&mut self, _record: &PersonRecord) -> Result<()> {
            Err(anyhow!("connection refused"))
        }
    }

    #[test]
    fn sqlite_round_trip_keeps_order_and_replaces_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("people.db");
        let db_path = db_path.to_str().unwrap();

        let mut repo = SqlitePeopleRepository::open(db_path).unwrap();
        repo.append(&record("a", "male")).unwrap();
        repo.append(&record("b", "female")).unwrap();
        let mut updated = record("a", "male");
        updated.metadata.sightings = 4;
        repo.append(&updated).unwrap();
        drop(repo);

        let mut reopened = SqlitePeopleRepository::open(db_path).unwrap();
        let records = reopened.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "a");
        assert_eq!(records[0].metadata.sightings, 4);
        assert_eq!(records[1].id, "b");
    }

    #[test]
    fn in_memory_replaces_by_id() {
        let mut repo = InMemoryPeopleRepository::new();
        repo.append(&record("a", "male")).unwrap();
        repo.append(&record("a", "female")).unwrap();
        let records = repo.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].descriptor.text("gender").as_deref(), Some("female"));
    }

    #[test]
    fn snapshot_flattens_and_assigns_ids() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"people": [
                {{"descriptor": {{"gender": "male", "clothing_top": {{"type": "jacket", "color": "red"}}}},
                  "metadata": {{"camera_id": "cam-9", "timestamp_ms": 5}}}},
                {{"id": "p-2", "descriptor": {{"gender": "female"}},
                  "metadata": {{"camera_id": "cam-9", "timestamp_ms": 6}}}}
            ]}}"#
        )
        .unwrap();
        let mut snapshot = SnapshotRepository::new(file.path());
        let records = snapshot.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "snapshot-0");
        assert_eq!(records[0].descriptor.text("clothing_top").as_deref(), Some("jacket"));
        assert_eq!(records[0].descriptor.text("clothing_top_color").as_deref(), Some("red"));
        assert_eq!(records[0].metadata.sightings, 1);
        assert_eq!(records[1].id, "p-2");
        assert!(snapshot.append(&records[1]).is_err());
    }

    #[test]
    fn load_people_falls_back_to_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": "s-1", "descriptor": {{"gender": "male"}}, "metadata": {{"camera_id": "c", "timestamp_ms": 1}}}}]"#
        )
        .unwrap();
        let mut snapshot = SnapshotRepository::new(file.path());
        let mut primary = Unreachable;

        let records = load_people(Some(&mut primary), Some(&mut snapshot)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "s-1");

        assert!(load_people(Some(&mut primary), None).is_err());
        assert!(load_people(None, None).unwrap().is_empty());

        let mut memory = InMemoryPeopleRepository::new();
        memory.append(&record("m-1", "female")).unwrap();
        let records = load_people(Some(&mut memory), Some(&mut snapshot)).unwrap();
        assert_eq!(records[0].id, "m-1");
    }
}
