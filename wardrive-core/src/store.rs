//! Observation store backends: a SQLite `entry(location, wifi)` table and an
//! append-only JSON-lines file.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::model::{Observation, StoredRow};
use crate::ports::ObservationStore;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        create_parent_dir(path)?;
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;
        debug!(path = %path.display(), "opened sqlite observation store");
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS entry (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                location TEXT NOT NULL,
                wifi TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl ObservationStore for SqliteStore {
    fn append(&self, obs: &Observation) -> Result<(), StoreError> {
        let row = StoredRow::from_observation(obs)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO entry (location, wifi) VALUES (?1, ?2)",
            params![row.location, row.wifi],
        )?;
        Ok(())
    }

    fn count_rows(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM entry", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entry", [])?;
        tx.commit()?;
        Ok(())
    }

    fn list(&self, limit: usize) -> Result<Vec<StoredRow>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT location, wifi FROM (
                SELECT id, location, wifi FROM entry ORDER BY id DESC LIMIT ?1
             ) ORDER BY id ASC",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(StoredRow {
                    location: row.get(0)?,
                    wifi: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// One JSON object per line. The file is only ever appended to; `clear_all`
/// truncates it in place so handles held by other processes stay valid.
pub struct JsonlStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        create_parent_dir(&path)?;
        let mut file = File::options().create(true).read(true).append(true).open(&path)?;
        let dropped = drop_torn_tail(&mut file)?;
        if dropped > 0 {
            warn!(path = %path.display(), bytes = dropped, "dropped incomplete trailing row");
        }
        debug!(path = %path.display(), "opened jsonl observation store");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    fn read_rows(&self) -> Result<Vec<StoredRow>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut out = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(row) = serde_json::from_str::<StoredRow>(&line) {
                out.push(row);
            }
        }
        Ok(out)
    }
}

impl ObservationStore for JsonlStore {
    fn append(&self, obs: &Observation) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(&StoredRow::from_observation(obs)?)?;
        line.push('\n');

        let mut file = self.file.lock();
        let len = file.metadata()?.len();
        let written = file.write_all(line.as_bytes()).and_then(|()| file.flush());
        if let Err(err) = written {
            // Never leave half a row behind for the next append to run into.
            if let Err(trunc) = file.set_len(len) {
                warn!(path = %self.path.display(), "cannot roll back partial row: {trunc}");
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn count_rows(&self) -> Result<u64, StoreError> {
        let _guard = self.file.lock();
        Ok(self.read_rows()?.len() as u64)
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        let file = self.file.lock();
        file.set_len(0)?;
        file.sync_all()?;
        Ok(())
    }

    fn list(&self, limit: usize) -> Result<Vec<StoredRow>, StoreError> {
        let _guard = self.file.lock();
        let mut rows = self.read_rows()?;
        let skip = rows.len().saturating_sub(limit);
        Ok(rows.split_off(skip))
    }
}

/// Cut the file back to its last newline. Returns the number of bytes removed.
fn drop_torn_tail(file: &mut File) -> Result<u64, StoreError> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }
    let mut data = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut data)?;
    if data.last() == Some(&b'\n') {
        return Ok(0);
    }
    let keep = data.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1) as u64;
    file.set_len(keep)?;
    Ok(len - keep)
}

pub(crate) fn create_parent_dir(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NetworkSighting, Position};
    use tempfile::tempdir;

    fn obs(ssid: &str) -> Observation {
        Observation::new(
            Position::new(47.0, 8.0, 5.0),
            NetworkSighting::new(ssid, "AA:BB", 2412, -50),
            "Somewhere",
        )
    }

    fn exercise(store: &dyn ObservationStore) {
        assert_eq!(store.count_rows().unwrap(), 0);
        store.append(&obs("one")).unwrap();
        store.append(&obs("two")).unwrap();
        store.append(&obs("three")).unwrap();
        assert_eq!(store.count_rows().unwrap(), 3);

        let last_two = store.list(2).unwrap();
        assert_eq!(last_two.len(), 2);
        assert!(last_two[0].wifi.contains("\"two\""));
        assert!(last_two[1].wifi.contains("\"three\""));

        store.clear_all().unwrap();
        assert_eq!(store.count_rows().unwrap(), 0);

        store.append(&obs("four")).unwrap();
        assert_eq!(store.count_rows().unwrap(), 1);
    }

    #[test]
    fn sqlite_store_appends_counts_and_clears() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("nested/obs.db")).unwrap();
        exercise(&store);
    }

    #[test]
    fn jsonl_store_appends_counts_and_clears() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(dir.path().join("obs.jsonl")).unwrap();
        exercise(&store);
    }

    #[test]
    fn sqlite_rows_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("obs.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.append(&obs("kept")).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.count_rows().unwrap(), 1);
    }

    #[test]
    fn jsonl_clear_from_second_handle_keeps_first_handle_writing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("obs.jsonl");
        let live = JsonlStore::open(&path).unwrap();
        live.append(&obs("one")).unwrap();

        let maintenance = JsonlStore::open(&path).unwrap();
        maintenance.clear_all().unwrap();
        live.append(&obs("two")).unwrap();
        live.append(&obs("three")).unwrap();

        assert_eq!(maintenance.count_rows().unwrap(), 2);
        let rows = live.list(10).unwrap();
        assert!(rows[0].wifi.contains("\"two\""));
        assert!(rows[1].wifi.contains("\"three\""));
    }

    #[test]
    fn jsonl_open_drops_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("obs.jsonl");
        let good = serde_json::to_string(&StoredRow::from_observation(&obs("good")).unwrap()).unwrap();
        fs::write(&path, format!("{good}\n{{\"location\":\"tor")).unwrap();

        let store = JsonlStore::open(&path).unwrap();
        assert_eq!(store.count_rows().unwrap(), 1);
        store.append(&obs("next")).unwrap();
        assert_eq!(store.count_rows().unwrap(), 2);
        assert!(fs::read_to_string(&path).unwrap().ends_with('\n'));
    }

    #[test]
    fn jsonl_torn_tail_without_any_newline_empties_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("obs.jsonl");
        fs::write(&path, "{\"loc").unwrap();
        let store = JsonlStore::open(&path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
        store.append(&obs("first")).unwrap();
        assert_eq!(store.count_rows().unwrap(), 1);
    }

    #[test]
    fn jsonl_skips_blank_and_corrupt_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("obs.jsonl");
        fs::write(&path, "\n{not json}\n").unwrap();
        let store = JsonlStore::open(&path).unwrap();
        store.append(&obs("good")).unwrap();

        let rows = store.list(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(store.count_rows().unwrap(), 1);
        assert!(rows[0].wifi.contains("\"good\""));
    }
}
