//! Local SQLite cache database for Storekeep.
//!
//! Uses rusqlite with WAL mode. Holds the key-value `local_settings` table
//! and the `inventory_cache` table that backs the merged-inventory snapshot
//! the home and inventory screens read before going to the network. The
//! cache handle is injectable state, shared explicitly by callers - never a
//! module-level global.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// Shared handle holding the cache database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the database at `{data_dir}/storekeep.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once - the cache is rebuildable from the
/// backend, losing it is acceptable.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = data_dir.join("storekeep.db");
    info!("Opening cache database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Cache database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)
                .map_err(|e| format!("Cache database open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;

    info!("Cache database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    info!("Migrating cache database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// v1: key-value settings store.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS local_settings (
            category TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT,
            updated_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (category, key)
        );
        INSERT INTO schema_version (version) VALUES (1);",
    )
    .map_err(|e| format!("migrate v1: {e}"))
}

/// v2: merged-inventory snapshots, one row per (cache key, store).
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS inventory_cache (
            cache_key TEXT NOT NULL,
            store_id TEXT NOT NULL,
            data TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (cache_key, store_id)
        );
        INSERT INTO schema_version (version) VALUES (2);",
    )
    .map_err(|e| format!("migrate v2: {e}"))
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Read a setting value, `None` on miss.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT value FROM local_settings WHERE category = ?1 AND key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
    .flatten()
}

/// Upsert a setting value.
pub fn set_setting(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (category, key, value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT (category, key)
         DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set setting {category}/{key}: {e}"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Inventory cache helpers
// ---------------------------------------------------------------------------

/// Read a cached inventory payload for a store. Returns `None` on miss,
/// lock failure, or a payload that no longer parses.
pub fn read_inventory_cache(
    db: &DbState,
    cache_key: &str,
    store_id: &str,
) -> Option<serde_json::Value> {
    let conn = db.conn.lock().ok()?;
    let raw: Option<String> = conn
        .query_row(
            "SELECT data FROM inventory_cache WHERE cache_key = ?1 AND store_id = ?2",
            params![cache_key, store_id],
            |row| row.get(0),
        )
        .ok();
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

/// Write (upsert) a cached inventory payload for a store.
pub fn write_inventory_cache(
    db: &DbState,
    cache_key: &str,
    store_id: &str,
    data: &serde_json::Value,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT INTO inventory_cache (cache_key, store_id, data, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT (cache_key, store_id)
         DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        params![cache_key, store_id, data.to_string()],
    )
    .map_err(|e| format!("write inventory cache {cache_key}: {e}"))?;
    Ok(())
}

/// Delete every cached inventory row for a store. Called after successful
/// quantity writes so subsequent reads re-fetch instead of serving stale
/// merged data.
pub fn clear_inventory_cache_for_store(db: &DbState, store_id: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "DELETE FROM inventory_cache WHERE store_id = ?1",
        params![store_id],
    )
    .map_err(|e| format!("clear inventory cache for store: {e}"))?;
    Ok(())
}

/// Delete every cached inventory row for every store (logout path).
pub fn clear_inventory_cache(db: &DbState) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute("DELETE FROM inventory_cache", [])
        .map_err(|e| format!("clear inventory cache: {e}"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

/// Run migrations against an arbitrary (usually in-memory) connection.
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("test migrations");
}

/// Build an in-memory `DbState` for tests.
#[cfg(test)]
pub fn test_db() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    run_migrations_for_test(&conn);
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_roundtrip_and_overwrite() {
        let db = test_db();
        let conn = db.conn.lock().unwrap();

        assert_eq!(get_setting(&conn, "app", "last_store_id"), None);
        set_setting(&conn, "app", "last_store_id", "store-1").unwrap();
        assert_eq!(
            get_setting(&conn, "app", "last_store_id").as_deref(),
            Some("store-1")
        );
        set_setting(&conn, "app", "last_store_id", "store-2").unwrap();
        assert_eq!(
            get_setting(&conn, "app", "last_store_id").as_deref(),
            Some("store-2")
        );
    }

    #[test]
    fn inventory_cache_is_scoped_by_store() {
        let db = test_db();
        let payload = serde_json::json!({ "products": [{ "id": "p1", "quantity": 3 }] });

        write_inventory_cache(&db, "inventory_persisted_state", "store-1", &payload).unwrap();

        assert!(read_inventory_cache(&db, "inventory_persisted_state", "store-1").is_some());
        // A different store id must not see the snapshot
        assert!(read_inventory_cache(&db, "inventory_persisted_state", "store-2").is_none());
    }

    #[test]
    fn clearing_for_store_removes_all_keys() {
        let db = test_db();
        let payload = serde_json::json!([]);
        write_inventory_cache(&db, "inventory_persisted_state", "store-1", &payload).unwrap();
        write_inventory_cache(&db, "inventory_products_cache", "store-1", &payload).unwrap();
        write_inventory_cache(&db, "inventory_products_cache", "store-2", &payload).unwrap();

        clear_inventory_cache_for_store(&db, "store-1").unwrap();

        assert!(read_inventory_cache(&db, "inventory_persisted_state", "store-1").is_none());
        assert!(read_inventory_cache(&db, "inventory_products_cache", "store-1").is_none());
        assert!(read_inventory_cache(&db, "inventory_products_cache", "store-2").is_some());
    }
}
