//! SQLite schema for the temporal cache.
//!
//! One table per namespace, all with the same shape:
//!
//! | column         | meaning                                    |
//! |----------------|--------------------------------------------|
//! | `key`          | entry key, see [`super::key`]              |
//! | `data`         | JSON payload, including its `_meta` object |
//! | `generated_at` | write time, unix milliseconds              |
//! | `ttl`          | lifetime in milliseconds                   |

use rusqlite::{Connection, Result};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Create the tables if needed and record the schema version.
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < SCHEMA_VERSION {
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

/// Get the current schema version (0 if not initialized).
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Per-user language scores for a relay set and window
        CREATE TABLE IF NOT EXISTS language_index (
            key TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            generated_at INTEGER NOT NULL,
            ttl INTEGER NOT NULL
        );

        -- Raw records behind a language index entry (same key)
        CREATE TABLE IF NOT EXISTS records (
            key TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            generated_at INTEGER NOT NULL,
            ttl INTEGER NOT NULL
        );

        -- Activity series per metric window
        CREATE TABLE IF NOT EXISTS metrics (
            key TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            generated_at INTEGER NOT NULL,
            ttl INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}
