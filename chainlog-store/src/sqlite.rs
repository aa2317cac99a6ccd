//! SQLite-backed entry persistence.

use chainlog_types::{Hash, HybridTimestamp, IdentityKey};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::identity::ChainProof;
use crate::persistence::{EntryPersistence, LogDescriptor};
use crate::{Entry, ProvenEntry, StorageError, StorageResult};

/// Persistent entry store backed by SQLite.
pub struct SqlitePersistence {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePersistence {
    /// Opens (or creates) a store at the given path.
    pub fn new(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> StorageResult<()> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS logs (
                name TEXT PRIMARY KEY,
                identity_key TEXT NOT NULL,
                writable INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entries (
                log_name TEXT NOT NULL,
                seq INTEGER NOT NULL,
                payload BLOB NOT NULL,
                previous_hash TEXT NOT NULL,
                hash TEXT NOT NULL,
                wall_time INTEGER NOT NULL,
                logical INTEGER NOT NULL,
                signature BLOB NOT NULL,
                PRIMARY KEY (log_name, seq)
            );
            ",
        )?;
        Ok(())
    }
}

fn parse_hash(s: &str) -> StorageResult<Hash> {
    Hash::from_hex(s).map_err(|e| StorageError::InvalidData(format!("bad hash {s}: {e}")))
}

impl EntryPersistence for SqlitePersistence {
    fn load_seed(&self) -> StorageResult<Option<[u8; 32]>> {
        let value: Option<Vec<u8>> = self
            .conn()
            .query_row("SELECT value FROM meta WHERE key = 'seed'", [], |row| {
                row.get(0)
            })
            .optional()?;
        value
            .map(|bytes| {
                let len = bytes.len();
                bytes
                    .try_into()
                    .map_err(|_| StorageError::InvalidData(format!("seed has {len} bytes")))
            })
            .transpose()
    }

    fn store_seed(&self, seed: &[u8; 32]) -> StorageResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('seed', ?1)",
            params![seed.as_slice()],
        )?;
        Ok(())
    }

    fn list_logs(&self) -> StorageResult<Vec<LogDescriptor>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT name, identity_key, writable FROM logs ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(name, key, writable)| {
                let identity = IdentityKey::from_hex(&key).map_err(|e| {
                    StorageError::InvalidData(format!("bad identity for {name}: {e}"))
                })?;
                Ok(LogDescriptor {
                    name,
                    identity,
                    writable,
                })
            })
            .collect()
    }

    fn register_log(&self, descriptor: &LogDescriptor) -> StorageResult<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO logs (name, identity_key, writable) VALUES (?1, ?2, ?3)",
            params![
                descriptor.name,
                descriptor.identity.to_hex(),
                descriptor.writable
            ],
        )?;
        Ok(())
    }

    fn load_entries(&self, name: &str) -> StorageResult<Vec<ProvenEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT seq, payload, previous_hash, hash, wall_time, logical, signature
             FROM entries WHERE log_name = ?1 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![name], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Vec<u8>>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(seq, payload, prev, hash, wall, logical, sig)| {
                let sig_len = sig.len();
                let signature: [u8; 64] = sig.try_into().map_err(|_| {
                    StorageError::InvalidData(format!("signature at {seq} has {sig_len} bytes"))
                })?;
                Ok(ProvenEntry {
                    entry: Entry {
                        index: seq as u64,
                        payload,
                        previous_hash: parse_hash(&prev)?,
                        hash: parse_hash(&hash)?,
                        timestamp: HybridTimestamp::new(wall as u64, logical as u32),
                    },
                    proof: ChainProof::from_bytes(signature),
                })
            })
            .collect()
    }

    fn append_entries(&self, name: &str, entries: &[ProvenEntry]) -> StorageResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO entries
                 (log_name, seq, payload, previous_hash, hash, wall_time, logical, signature)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for ProvenEntry { entry, proof } in entries {
                stmt.execute(params![
                    name,
                    entry.index as i64,
                    entry.payload,
                    entry.previous_hash.to_hex(),
                    entry.hash.to_hex(),
                    entry.timestamp.wall_time() as i64,
                    i64::from(entry.timestamp.logical()),
                    proof.as_bytes().as_slice(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
