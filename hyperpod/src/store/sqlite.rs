//! SQLite-backed pod store.

use std::path::Path;

use hyperpod_shared::errors::{HyperpodError, HyperpodResult};
use parking_lot::Mutex;
use rusqlite::{Connection, params};

use super::PodStore;

/// Pod store over a single SQLite database file.
///
/// The connection is guarded by a mutex; every call is one short
/// transaction, so contention stays bounded by the registry's own locking.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and initialize) the database at `path`.
    pub fn open(path: &Path) -> HyperpodResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| HyperpodError::Internal(format!("cannot open pod store: {}", e)))?;
        Self::init(conn)
    }

    /// Open an in-memory database (tests, throwaway daemons).
    pub fn open_in_memory() -> HyperpodResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| HyperpodError::Internal(format!("cannot open pod store: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> HyperpodResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pods (
                 id   TEXT PRIMARY KEY,
                 spec TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS pod_containers (
                 pod_id       TEXT NOT NULL,
                 container_id TEXT NOT NULL,
                 idx          INTEGER NOT NULL,
                 PRIMARY KEY (pod_id, container_id)
             );
             CREATE TABLE IF NOT EXISTS pod_volumes (
                 pod_id TEXT NOT NULL,
                 name   TEXT NOT NULL,
                 source TEXT NOT NULL,
                 PRIMARY KEY (pod_id, name)
             );",
        )
        .map_err(db_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn db_err(e: rusqlite::Error) -> HyperpodError {
    HyperpodError::Internal(format!("pod store error: {}", e))
}

impl PodStore for SqliteStore {
    fn write_pod(&self, id: &str, spec_json: &str) -> HyperpodResult<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO pods (id, spec) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET spec = excluded.spec",
                params![id, spec_json],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn read_pod(&self, id: &str) -> HyperpodResult<Option<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT spec FROM pods WHERE id = ?1")
            .map_err(db_err)?;
        let mut rows = stmt.query(params![id]).map_err(db_err)?;
        match rows.next().map_err(db_err)? {
            Some(row) => Ok(Some(row.get(0).map_err(db_err)?)),
            None => Ok(None),
        }
    }

    fn delete_pod(&self, id: &str) -> HyperpodResult<()> {
        self.conn
            .lock()
            .execute("DELETE FROM pods WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(())
    }

    fn write_pod_containers(&self, id: &str, container_ids: &[String]) -> HyperpodResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "DELETE FROM pod_containers WHERE pod_id = ?1",
            params![id],
        )
        .map_err(db_err)?;
        for (idx, cid) in container_ids.iter().enumerate() {
            tx.execute(
                "INSERT INTO pod_containers (pod_id, container_id, idx) VALUES (?1, ?2, ?3)",
                params![id, cid, idx as i64],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    fn read_pod_containers(&self, id: &str) -> HyperpodResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT container_id FROM pod_containers WHERE pod_id = ?1 ORDER BY idx")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.map_err(db_err)?);
        }
        Ok(ids)
    }

    fn delete_pod_containers(&self, id: &str) -> HyperpodResult<()> {
        self.conn
            .lock()
            .execute("DELETE FROM pod_containers WHERE pod_id = ?1", params![id])
            .map_err(db_err)?;
        Ok(())
    }

    fn write_volume(&self, pod_id: &str, name: &str, source: &str) -> HyperpodResult<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO pod_volumes (pod_id, name, source) VALUES (?1, ?2, ?3)
                 ON CONFLICT(pod_id, name) DO UPDATE SET source = excluded.source",
                params![pod_id, name, source],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn delete_volumes(&self, pod_id: &str) -> HyperpodResult<()> {
        self.conn
            .lock()
            .execute("DELETE FROM pod_volumes WHERE pod_id = ?1", params![pod_id])
            .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.read_pod("pod-a").unwrap().is_none());

        store.write_pod("pod-a", "{\"name\":\"a\"}").unwrap();
        assert_eq!(
            store.read_pod("pod-a").unwrap().as_deref(),
            Some("{\"name\":\"a\"}")
        );

        store.write_pod("pod-a", "{\"name\":\"b\"}").unwrap();
        assert_eq!(
            store.read_pod("pod-a").unwrap().as_deref(),
            Some("{\"name\":\"b\"}")
        );

        store.delete_pod("pod-a").unwrap();
        assert!(store.read_pod("pod-a").unwrap().is_none());
    }

    #[test]
    fn test_container_list_replaced_in_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .write_pod_containers("pod-a", &["c1".into(), "c2".into()])
            .unwrap();
        assert_eq!(store.read_pod_containers("pod-a").unwrap(), vec!["c1", "c2"]);

        store.write_pod_containers("pod-a", &["c3".into()]).unwrap();
        assert_eq!(store.read_pod_containers("pod-a").unwrap(), vec!["c3"]);

        store.delete_pod_containers("pod-a").unwrap();
        assert!(store.read_pod_containers("pod-a").unwrap().is_empty());
    }

    #[test]
    fn test_volume_records() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.write_volume("pod-a", "data", "/vols/data").unwrap();
        store.write_volume("pod-a", "data", "/vols/data2").unwrap();
        store.delete_volumes("pod-a").unwrap();
    }
}
