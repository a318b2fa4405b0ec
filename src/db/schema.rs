use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS risk_events (
            id                 TEXT PRIMARY KEY,
            event_ts           TEXT NOT NULL,
            country            TEXT NOT NULL,
            region             TEXT NOT NULL,
            commodity          TEXT NOT NULL,
            risk_score         REAL NOT NULL,
            window_minutes     INTEGER NOT NULL,
            contributors       TEXT NOT NULL, -- JSON
            recommended_action TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS alerts (
            id              TEXT PRIMARY KEY,
            risk_event_id   TEXT,
            country         TEXT NOT NULL,
            region          TEXT NOT NULL,
            commodity       TEXT NOT NULL,
            title           TEXT NOT NULL,
            description     TEXT NOT NULL,
            risk_score      REAL NOT NULL,
            severity        TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'open',
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            acknowledged_at TEXT,
            resolved_at     TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_risk_events_ts ON risk_events(event_ts DESC);
        CREATE INDEX IF NOT EXISTS idx_risk_events_key ON risk_events(country, commodity);
        CREATE INDEX IF NOT EXISTS idx_alerts_cooldown ON alerts(country, region, commodity, status, created_at);
        CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at DESC);
        ",
    )?;
    Ok(())
}
