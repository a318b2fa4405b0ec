pub mod schema;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::alerts::AlertStore;
use crate::core::pipeline::RiskEventStore;
use crate::core::{AggregationKey, Alert, AlertStatus, Contributor, RiskEvent};
use crate::error::StoreError;

/// Listing limits outside `1..=MAX_LIST_LIMIT` fall back to this.
pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const MAX_LIST_LIMIT: usize = 500;

/// Alert and risk-event counters for the operator overview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub open_alerts: usize,
    pub acknowledged_alerts: usize,
    pub resolved_last_24h: usize,
    pub avg_risk_score_24h: f64,
}

pub struct Database {
    conn: Connection,
}

/// Thread-safe wrapper around Database.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(db)),
        })
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_risk_event(&self, event: &RiskEvent) -> Result<bool, StoreError> {
        self.db().insert_risk_event(event)
    }

    pub fn list_risk_events(
        &self,
        country: Option<&str>,
        commodity: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RiskEvent>, StoreError> {
        self.db().list_risk_events(country, commodity, limit)
    }

    pub fn has_open_alert(&self, key: &AggregationKey, since: DateTime<Utc>) -> Result<bool, StoreError> {
        self.db().has_open_alert(key, since)
    }

    pub fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        self.db().insert_alert(alert)
    }

    pub fn insert_alert_unless_covered(&self, alert: &Alert, since: DateTime<Utc>) -> Result<bool, StoreError> {
        self.db().insert_alert_unless_covered(alert, since)
    }

    pub fn get_alert(&self, id: &str) -> Result<Option<Alert>, StoreError> {
        self.db().get_alert(id)
    }

    pub fn list_alerts(&self, status: Option<AlertStatus>, limit: usize) -> Result<Vec<Alert>, StoreError> {
        self.db().list_alerts(status, limit)
    }

    pub fn update_alert_status(&self, id: &str, status: AlertStatus, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.db().update_alert_status(id, status, now)
    }

    pub fn dashboard_summary(&self, now: DateTime<Utc>) -> Result<DashboardSummary, StoreError> {
        self.db().dashboard_summary(now)
    }
}

impl AlertStore for SharedDatabase {
    fn has_open_alert(&self, key: &AggregationKey, since: DateTime<Utc>) -> Result<bool, StoreError> {
        SharedDatabase::has_open_alert(self, key, since)
    }

    fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        SharedDatabase::insert_alert(self, alert)
    }

    fn insert_alert_unless_covered(&self, alert: &Alert, since: DateTime<Utc>) -> Result<bool, StoreError> {
        SharedDatabase::insert_alert_unless_covered(self, alert, since)
    }

    fn update_status(&self, id: &str, status: AlertStatus, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.update_alert_status(id, status, now)
    }
}

impl RiskEventStore for SharedDatabase {
    fn insert_risk_event(&self, event: &RiskEvent) -> Result<bool, StoreError> {
        SharedDatabase::insert_risk_event(self, event)
    }
}

/// Fixed-width UTC text so lexical order matches time order.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn ts_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn enum_column<T: FromStr<Err = String>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn clamp_limit(limit: usize) -> i64 {
    if limit == 0 || limit > MAX_LIST_LIMIT {
        DEFAULT_LIST_LIMIT as i64
    } else {
        limit as i64
    }
}

const ALERT_COLUMNS: &str = "id, COALESCE(risk_event_id, ''), country, region, commodity, title, description, \
     risk_score, severity, status, created_at, updated_at";

const ACTIVE_ALERT_EXISTS: &str = "SELECT EXISTS (
         SELECT 1 FROM alerts
         WHERE status IN ('open', 'acknowledged')
           AND country = ?1 AND region = ?2 AND commodity = ?3
           AND created_at >= ?4
     )";

const INSERT_ALERT: &str = "INSERT INTO alerts
         (id, risk_event_id, country, region, commodity, title, description, risk_score, severity, status, created_at, updated_at)
     VALUES (?1, NULLIF(?2, ''), ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

impl Database {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;")?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Append a risk event. A duplicate id is a no-op; returns whether a row was written.
    pub fn insert_risk_event(&self, event: &RiskEvent) -> Result<bool, StoreError> {
        let contributors = serde_json::to_string(&event.contributors)?;
        let changed = self.conn.execute(
            "INSERT INTO risk_events
                 (id, event_ts, country, region, commodity, risk_score, window_minutes, contributors, recommended_action)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO NOTHING",
            rusqlite::params![
                event.id,
                ts(event.timestamp),
                event.country,
                event.region,
                event.commodity,
                event.risk_score,
                event.window_minutes,
                contributors,
                event.recommended_action,
            ],
        )?;
        Ok(changed > 0)
    }

    fn row_to_risk_event(row: &rusqlite::Row) -> rusqlite::Result<RiskEvent> {
        let raw: String = row.get(7)?;
        let contributors: Vec<Contributor> = serde_json::from_str(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
        Ok(RiskEvent {
            id: row.get(0)?,
            timestamp: ts_column(row, 1)?,
            country: row.get(2)?,
            region: row.get(3)?,
            commodity: row.get(4)?,
            risk_score: row.get(5)?,
            window_minutes: row.get(6)?,
            contributors,
            recommended_action: row.get(8)?,
        })
    }

    /// Newest risk events first, optionally filtered by country and commodity.
    pub fn list_risk_events(
        &self,
        country: Option<&str>,
        commodity: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RiskEvent>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_ts, country, region, commodity, risk_score, window_minutes, contributors, recommended_action
             FROM risk_events
             WHERE (?1 IS NULL OR country = ?1)
               AND (?2 IS NULL OR commodity = ?2)
             ORDER BY event_ts DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![country, commodity, clamp_limit(limit)],
            Self::row_to_risk_event,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn has_open_alert(&self, key: &AggregationKey, since: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self.conn.query_row(
            ACTIVE_ALERT_EXISTS,
            rusqlite::params![key.country, key.region, key.commodity, ts(since)],
            |row| row.get(0),
        )?)
    }

    pub fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        Self::insert_alert_on(&self.conn, alert)
    }

    fn insert_alert_on(conn: &Connection, alert: &Alert) -> Result<(), StoreError> {
        conn.execute(
            INSERT_ALERT,
            rusqlite::params![
                alert.id,
                alert.risk_event_id,
                alert.country,
                alert.region,
                alert.commodity,
                alert.title,
                alert.description,
                alert.risk_score,
                alert.severity.as_str(),
                alert.status.as_str(),
                ts(alert.created_at),
                ts(alert.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Cooldown check and insert in one write transaction, so concurrent
    /// writers (threads or processes) cannot both raise for the same key.
    pub fn insert_alert_unless_covered(&mut self, alert: &Alert, since: DateTime<Utc>) -> Result<bool, StoreError> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let covered: bool = tx.query_row(
            ACTIVE_ALERT_EXISTS,
            rusqlite::params![alert.country, alert.region, alert.commodity, ts(since)],
            |row| row.get(0),
        )?;
        if covered {
            return Ok(false);
        }
        Self::insert_alert_on(&tx, alert)?;
        tx.commit()?;
        Ok(true)
    }

    fn row_to_alert(row: &rusqlite::Row) -> rusqlite::Result<Alert> {
        Ok(Alert {
            id: row.get(0)?,
            risk_event_id: row.get(1)?,
            country: row.get(2)?,
            region: row.get(3)?,
            commodity: row.get(4)?,
            title: row.get(5)?,
            description: row.get(6)?,
            risk_score: row.get(7)?,
            severity: enum_column(row, 8)?,
            status: enum_column(row, 9)?,
            created_at: ts_column(row, 10)?,
            updated_at: ts_column(row, 11)?,
        })
    }

    pub fn get_alert(&self, id: &str) -> Result<Option<Alert>, StoreError> {
        let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, rusqlite::params![id], Self::row_to_alert)
            .optional()?)
    }

    /// Newest alerts first, optionally filtered by status.
    pub fn list_alerts(&self, status: Option<AlertStatus>, limit: usize) -> Result<Vec<Alert>, StoreError> {
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM alerts
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at DESC
             LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![status.map(|s| s.as_str()), clamp_limit(limit)],
            Self::row_to_alert,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Move an alert through the operator workflow, stamping the
    /// acknowledged/resolved times on entry to those states.
    pub fn update_alert_status(&mut self, id: &str, status: AlertStatus, now: DateTime<Utc>) -> Result<(), StoreError> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: Option<String> = tx
            .query_row("SELECT status FROM alerts WHERE id = ?1", rusqlite::params![id], |row| row.get(0))
            .optional()?;
        let Some(current) = current else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        let current: AlertStatus = current.parse().map_err(|e: String| {
            StoreError::Sqlite(rusqlite::Error::FromSqlConversionFailure(0, Type::Text, e.into()))
        })?;
        if !current.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to: status,
            });
        }

        tx.execute(
            "UPDATE alerts
             SET status = ?2,
                 updated_at = ?3,
                 acknowledged_at = CASE WHEN ?2 = 'acknowledged' THEN ?3 ELSE acknowledged_at END,
                 resolved_at = CASE WHEN ?2 = 'resolved' THEN ?3 ELSE resolved_at END
             WHERE id = ?1",
            rusqlite::params![id, status.as_str(), ts(now)],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn dashboard_summary(&self, now: DateTime<Utc>) -> Result<DashboardSummary, StoreError> {
        let day_ago = ts(now - Duration::hours(24));
        Ok(self.conn.query_row(
            "SELECT
                 (SELECT COUNT(*) FROM alerts WHERE status = 'open'),
                 (SELECT COUNT(*) FROM alerts WHERE status = 'acknowledged'),
                 (SELECT COUNT(*) FROM alerts WHERE status = 'resolved' AND resolved_at >= ?1),
                 (SELECT COALESCE(AVG(risk_score), 0.0) FROM risk_events WHERE event_ts >= ?1)",
            rusqlite::params![day_ago],
            |row| {
                Ok(DashboardSummary {
                    open_alerts: row.get::<_, i64>(0)? as usize,
                    acknowledged_alerts: row.get::<_, i64>(1)? as usize,
                    resolved_last_24h: row.get::<_, i64>(2)? as usize,
                    avg_risk_score_24h: row.get(3)?,
                })
            },
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::build_alert;
    use crate::core::{AlertSeverity, SignalSource};
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn open_test_db() -> SharedDatabase {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "supplyshock_test_{}_{}.db",
            std::process::id(),
            id
        ));
        // Remove if leftover from previous run
        let _ = std::fs::remove_file(&path);
        SharedDatabase::open(&path).unwrap()
    }

    fn make_event(country: &str, region: &str, commodity: &str, score: f64, at: DateTime<Utc>) -> RiskEvent {
        RiskEvent {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: at,
            country: country.into(),
            region: region.into(),
            commodity: commodity.into(),
            risk_score: score,
            window_minutes: 30,
            contributors: vec![Contributor {
                source: SignalSource::Weather,
                metric_name: "rainfall_mm".into(),
                metric_value: 88.0,
                score: 71.5,
            }],
            recommended_action: "Moderate risk: monitor hourly and prepare route alternatives.".into(),
        }
    }

    #[test]
    fn risk_event_insert_is_idempotent() {
        let db = open_test_db();
        let event = make_event("US", "east", "diesel", 80.0, Utc::now());
        assert!(db.insert_risk_event(&event).unwrap());
        assert!(!db.insert_risk_event(&event).unwrap());

        let stored = db.list_risk_events(None, None, 10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, event.id);
        assert_eq!(stored[0].contributors, event.contributors);
        assert_eq!(stored[0].risk_score, 80.0);
    }

    #[test]
    fn risk_events_filtered_and_newest_first() {
        let db = open_test_db();
        let t0 = Utc::now();
        db.insert_risk_event(&make_event("US", "east", "diesel", 50.0, t0)).unwrap();
        db.insert_risk_event(&make_event("US", "east", "diesel", 60.0, t0 + Duration::seconds(5))).unwrap();
        db.insert_risk_event(&make_event("DE", "north", "wheat", 70.0, t0)).unwrap();

        let us = db.list_risk_events(Some("US"), None, 0).unwrap();
        assert_eq!(us.len(), 2);
        assert_eq!(us[0].risk_score, 60.0);

        let wheat = db.list_risk_events(None, Some("wheat"), 10).unwrap();
        assert_eq!(wheat.len(), 1);
        assert_eq!(wheat[0].country, "DE");
    }

    #[test]
    fn alert_roundtrip() {
        let db = open_test_db();
        let now = Utc::now();
        let alert = build_alert(&make_event("US", "east", "diesel", 92.0, now), now);
        db.insert_alert(&alert).unwrap();

        let found = db.get_alert(&alert.id).unwrap().unwrap();
        assert_eq!(found.severity, AlertSeverity::Critical);
        assert_eq!(found.status, AlertStatus::Open);
        assert_eq!(found.risk_event_id, alert.risk_event_id);
        assert_eq!(found.title, alert.title);
        assert!(db.get_alert("missing").unwrap().is_none());
    }

    #[test]
    fn open_alert_lookup_respects_key_status_and_cutoff() {
        let db = open_test_db();
        let t0 = Utc::now();
        let alert = build_alert(&make_event("US", "east", "diesel", 80.0, t0), t0);
        db.insert_alert(&alert).unwrap();

        let key = AggregationKey::new("US", "east", "diesel");
        assert!(db.has_open_alert(&key, t0 - Duration::minutes(30)).unwrap());
        assert!(db.has_open_alert(&key, t0).unwrap());
        assert!(!db.has_open_alert(&key, t0 + Duration::seconds(1)).unwrap());
        assert!(!db.has_open_alert(&AggregationKey::new("US", "west", "diesel"), t0 - Duration::minutes(30)).unwrap());

        db.update_alert_status(&alert.id, AlertStatus::Acknowledged, t0).unwrap();
        assert!(db.has_open_alert(&key, t0 - Duration::minutes(30)).unwrap());

        db.update_alert_status(&alert.id, AlertStatus::Resolved, t0).unwrap();
        assert!(!db.has_open_alert(&key, t0 - Duration::minutes(30)).unwrap());
    }

    #[test]
    fn insert_unless_covered_rejects_second_alert() {
        let db = open_test_db();
        let t0 = Utc::now();
        let since = t0 - Duration::minutes(30);
        let first = build_alert(&make_event("US", "east", "diesel", 80.0, t0), t0);
        let second = build_alert(&make_event("US", "east", "diesel", 85.0, t0), t0);

        assert!(db.insert_alert_unless_covered(&first, since).unwrap());
        assert!(!db.insert_alert_unless_covered(&second, since).unwrap());
        assert_eq!(db.list_alerts(None, 10).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_dedup_inserts_single_alert() {
        let db = open_test_db();
        let t0 = Utc::now();
        let since = t0 - Duration::minutes(30);
        let inserted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let db = db.clone();
                    scope.spawn(move || {
                        let alert = build_alert(&make_event("US", "east", "diesel", 80.0 + i as f64, t0), t0);
                        db.insert_alert_unless_covered(&alert, since).unwrap() as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(inserted, 1);
    }

    #[test]
    fn status_update_workflow() {
        let db = open_test_db();
        let t0 = Utc::now();
        let alert = build_alert(&make_event("US", "east", "diesel", 80.0, t0), t0);
        db.insert_alert(&alert).unwrap();

        let t1 = t0 + Duration::minutes(3);
        db.update_alert_status(&alert.id, AlertStatus::Acknowledged, t1).unwrap();
        let found = db.get_alert(&alert.id).unwrap().unwrap();
        assert_eq!(found.status, AlertStatus::Acknowledged);
        assert_eq!(ts(found.updated_at), ts(t1));
        assert_eq!(ts(found.created_at), ts(t0));

        db.update_alert_status(&alert.id, AlertStatus::Resolved, t1).unwrap();
        let err = db.update_alert_status(&alert.id, AlertStatus::Open, t1).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { from: AlertStatus::Resolved, to: AlertStatus::Open, .. }));
        assert!(err.is_client_error());
    }

    #[test]
    fn status_update_unknown_id() {
        let db = open_test_db();
        let err = db.update_alert_status("nope", AlertStatus::Resolved, Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref id) if id == "nope"));
        assert!(err.is_client_error());
    }

    #[test]
    fn list_alerts_by_status() {
        let db = open_test_db();
        let t0 = Utc::now();
        let a = build_alert(&make_event("US", "east", "diesel", 80.0, t0), t0);
        let b = build_alert(&make_event("IN", "south", "rice", 90.0, t0 + Duration::seconds(1)), t0 + Duration::seconds(1));
        db.insert_alert(&a).unwrap();
        db.insert_alert(&b).unwrap();
        db.update_alert_status(&a.id, AlertStatus::Resolved, t0).unwrap();

        let all = db.list_alerts(None, 10).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, b.id);

        let open = db.list_alerts(Some(AlertStatus::Open), 10).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, b.id);
    }

    #[test]
    fn dashboard_summary_counts() {
        let db = open_test_db();
        let now = Utc::now();
        assert_eq!(
            db.dashboard_summary(now).unwrap(),
            DashboardSummary { open_alerts: 0, acknowledged_alerts: 0, resolved_last_24h: 0, avg_risk_score_24h: 0.0 }
        );

        db.insert_risk_event(&make_event("US", "east", "diesel", 80.0, now)).unwrap();
        db.insert_risk_event(&make_event("US", "east", "diesel", 60.0, now)).unwrap();
        db.insert_risk_event(&make_event("US", "east", "diesel", 10.0, now - Duration::hours(30))).unwrap();

        let a = build_alert(&make_event("US", "east", "diesel", 80.0, now), now);
        let b = build_alert(&make_event("DE", "north", "wheat", 80.0, now), now);
        let c = build_alert(&make_event("JP", "metro", "rice", 80.0, now), now);
        for alert in [&a, &b, &c] {
            db.insert_alert(alert).unwrap();
        }
        db.update_alert_status(&b.id, AlertStatus::Acknowledged, now).unwrap();
        db.update_alert_status(&c.id, AlertStatus::Resolved, now).unwrap();

        let summary = db.dashboard_summary(now).unwrap();
        assert_eq!(summary.open_alerts, 1);
        assert_eq!(summary.acknowledged_alerts, 1);
        assert_eq!(summary.resolved_last_24h, 1);
        assert!((summary.avg_risk_score_24h - 70.0).abs() < 1e-9);
    }
}
