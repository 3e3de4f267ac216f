use rusqlite::Connection;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS operations (
            detector_id TEXT NOT NULL,
            tx_hash TEXT NOT NULL,
            block_number INTEGER NOT NULL,
            state INTEGER NOT NULL,
            done INTEGER NOT NULL,
            expires_at INTEGER,
            PRIMARY KEY (detector_id, tx_hash)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS block_cursor (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            number INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_operations_expires_at
         ON operations (expires_at)",
        [],
    )?;

    Ok(())
}
