//! Durable route-timing store (C8).
//!
//! One row per served HTTP request in an embedded SQLite database;
//! writes are serialized through a single connection behind a mutex.
//! Percentiles are computed exactly on the stored rows — no sampling.

use chrono::{DateTime, Duration, Utc};
use flowmetric_error::{FlowError, Result};
use flowmetric_metrics::{mean, percentile};
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;
use tracing::debug;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS request_timings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp_ms INTEGER NOT NULL,
        route TEXT NOT NULL,
        method TEXT NOT NULL,
        duration_ms REAL NOT NULL,
        status_code INTEGER NOT NULL,
        cache_hit INTEGER NOT NULL,
        error_tag TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_timings_route_ts
        ON request_timings (route, timestamp_ms);
    CREATE INDEX IF NOT EXISTS idx_timings_ts
        ON request_timings (timestamp_ms);
";

/// One served request.
#[derive(Debug, Clone)]
pub struct RequestSample {
    pub timestamp: DateTime<Utc>,
    pub route: String,
    pub method: String,
    pub duration_ms: f64,
    pub status_code: u16,
    pub cache_hit: bool,
    pub error_tag: Option<String>,
}

/// Aggregates for one route.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStats {
    pub route: String,
    pub count: u64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub cache_hit_rate: f64,
}

/// One row of the slowest-routes listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSummary {
    pub route: String,
    pub count: u64,
    pub mean_ms: f64,
    pub max_ms: f64,
}

/// One hour of traffic for a route.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyPoint {
    pub hour: String,
    pub count: u64,
    pub mean_ms: f64,
}

/// Composite health grade.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthScore {
    /// Weighted composite in [0, 100]: latency 40%, cache-hit 30%,
    /// error-rate 30%.
    pub score: f64,
    pub grade: char,
    pub latency_component: f64,
    pub cache_component: f64,
    pub error_component: f64,
    pub sample_count: u64,
}

/// The store. All access funnels through one connection.
pub struct PerfStore {
    conn: Mutex<Connection>,
}

impl PerfStore {
    /// Open (creating the schema if needed) at `path`.
    ///
    /// # Errors
    ///
    /// `Internal` when SQLite cannot open or migrate the file.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| FlowError::internal(format!("perf store open: {e}")))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| FlowError::internal(format!("perf store schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    ///
    /// # Errors
    ///
    /// `Internal` when SQLite cannot create the database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| FlowError::internal(format!("perf store open: {e}")))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| FlowError::internal(format!("perf store schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append one row.
    ///
    /// # Errors
    ///
    /// `Internal` on write failure.
    pub fn record(&self, sample: &RequestSample) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO request_timings
                (timestamp_ms, route, method, duration_ms, status_code, cache_hit, error_tag)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                sample.timestamp.timestamp_millis(),
                sample.route,
                sample.method,
                sample.duration_ms,
                sample.status_code,
                sample.cache_hit as i64,
                sample.error_tag,
            ],
        )
        .map_err(|e| FlowError::internal(format!("perf store insert: {e}")))?;
        Ok(())
    }

    /// Exact aggregates for one route over the trailing window.
    ///
    /// # Errors
    ///
    /// `Internal` on read failure.
    pub fn route_stats(&self, route: &str, days_back: u32) -> Result<RouteStats> {
        let cutoff = cutoff_ms(days_back);
        let conn = self.conn.lock();

        let mut statement = conn
            .prepare(
                "SELECT duration_ms, cache_hit FROM request_timings
                 WHERE route = ?1 AND timestamp_ms >= ?2",
            )
            .map_err(internal)?;
        let rows = statement
            .query_map(rusqlite::params![route, cutoff], |row| {
                Ok((row.get::<_, f64>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(internal)?;

        let mut durations = Vec::new();
        let mut hits = 0u64;
        for row in rows {
            let (duration, cache_hit) = row.map_err(internal)?;
            durations.push(duration);
            hits += (cache_hit != 0) as u64;
        }

        let count = durations.len() as u64;
        Ok(RouteStats {
            route: route.to_string(),
            count,
            mean_ms: mean(&durations).unwrap_or(0.0),
            p50_ms: percentile(&durations, 50.0).unwrap_or(0.0),
            p95_ms: percentile(&durations, 95.0).unwrap_or(0.0),
            p99_ms: percentile(&durations, 99.0).unwrap_or(0.0),
            cache_hit_rate: if count == 0 {
                0.0
            } else {
                hits as f64 / count as f64
            },
        })
    }

    /// Slowest routes by mean duration.
    ///
    /// # Errors
    ///
    /// `Internal` on read failure.
    pub fn slowest_routes(&self, limit: u32, days_back: u32) -> Result<Vec<RouteSummary>> {
        let cutoff = cutoff_ms(days_back);
        let conn = self.conn.lock();
        let mut statement = conn
            .prepare(
                "SELECT route, COUNT(*), AVG(duration_ms), MAX(duration_ms)
                 FROM request_timings
                 WHERE timestamp_ms >= ?1
                 GROUP BY route
                 ORDER BY AVG(duration_ms) DESC
                 LIMIT ?2",
            )
            .map_err(internal)?;
        let rows = statement
            .query_map(rusqlite::params![cutoff, limit], |row| {
                Ok(RouteSummary {
                    route: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                    mean_ms: row.get(2)?,
                    max_ms: row.get(3)?,
                })
            })
            .map_err(internal)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(internal)
    }

    /// Hourly time series for one route.
    ///
    /// # Errors
    ///
    /// `Internal` on read failure.
    pub fn hourly_metrics(&self, route: &str, days_back: u32) -> Result<Vec<HourlyPoint>> {
        let cutoff = cutoff_ms(days_back);
        let conn = self.conn.lock();
        let mut statement = conn
            .prepare(
                "SELECT strftime('%Y-%m-%dT%H:00:00Z', timestamp_ms / 1000, 'unixepoch'),
                        COUNT(*), AVG(duration_ms)
                 FROM request_timings
                 WHERE route = ?1 AND timestamp_ms >= ?2
                 GROUP BY 1
                 ORDER BY 1",
            )
            .map_err(internal)?;
        let rows = statement
            .query_map(rusqlite::params![route, cutoff], |row| {
                Ok(HourlyPoint {
                    hour: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                    mean_ms: row.get(2)?,
                })
            })
            .map_err(internal)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(internal)
    }

    /// Delete rows older than the cutoff. Returns rows removed.
    ///
    /// # Errors
    ///
    /// `Internal` on write failure.
    pub fn rotate(&self, days_to_keep: u32) -> Result<u64> {
        let cutoff = cutoff_ms(days_to_keep);
        let conn = self.conn.lock();
        let removed = conn
            .execute(
                "DELETE FROM request_timings WHERE timestamp_ms < ?1",
                rusqlite::params![cutoff],
            )
            .map_err(internal)?;
        debug!(removed, days_to_keep, "perf store rotated");
        Ok(removed as u64)
    }

    /// Weighted composite of latency (40%), cache-hit (30%) and
    /// error-rate (30%), mapped to a letter grade.
    ///
    /// # Errors
    ///
    /// `Internal` on read failure.
    pub fn health_score(&self, days_back: u32) -> Result<HealthScore> {
        let cutoff = cutoff_ms(days_back);
        let conn = self.conn.lock();
        let (count, mean_ms, hit_rate, error_rate): (u64, f64, f64, f64) = conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(AVG(duration_ms), 0.0),
                        COALESCE(AVG(cache_hit), 0.0),
                        COALESCE(AVG(status_code >= 500), 0.0)
                 FROM request_timings
                 WHERE timestamp_ms >= ?1",
                rusqlite::params![cutoff],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)? as u64,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                    ))
                },
            )
            .map_err(internal)?;

        // Latency maps linearly: 100 at <= 100 ms mean, 0 at >= 2 s.
        let latency_component = if mean_ms <= 100.0 {
            100.0
        } else if mean_ms >= 2000.0 {
            0.0
        } else {
            100.0 * (2000.0 - mean_ms) / 1900.0
        };
        let cache_component = hit_rate * 100.0;
        let error_component = (1.0 - error_rate) * 100.0;
        let score = 0.4 * latency_component + 0.3 * cache_component + 0.3 * error_component;

        Ok(HealthScore {
            score,
            grade: grade_for(score),
            latency_component,
            cache_component,
            error_component,
            sample_count: count,
        })
    }
}

fn grade_for(score: f64) -> char {
    match score {
        s if s >= 90.0 => 'A',
        s if s >= 80.0 => 'B',
        s if s >= 70.0 => 'C',
        s if s >= 60.0 => 'D',
        _ => 'F',
    }
}

fn cutoff_ms(days_back: u32) -> i64 {
    (Utc::now() - Duration::days(i64::from(days_back))).timestamp_millis()
}

fn internal(e: rusqlite::Error) -> FlowError {
    FlowError::internal(format!("perf store query: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(route: &str, duration_ms: f64, status: u16, cache_hit: bool) -> RequestSample {
        RequestSample {
            timestamp: Utc::now(),
            route: route.to_string(),
            method: "GET".to_string(),
            duration_ms,
            status_code: status,
            cache_hit,
            error_tag: (status >= 500).then(|| "internal_error".to_string()),
        }
    }

    #[test]
    fn test_record_and_route_stats() {
        let store = PerfStore::in_memory().unwrap();
        for duration in [10.0, 20.0, 30.0, 40.0] {
            store.record(&sample("/api/metrics", duration, 200, duration > 20.0)).unwrap();
        }

        let stats = store.route_stats("/api/metrics", 7).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean_ms, 25.0);
        assert_eq!(stats.p50_ms, 20.0);
        assert_eq!(stats.p95_ms, 40.0);
        assert_eq!(stats.cache_hit_rate, 0.5);
    }

    #[test]
    fn test_percentiles_are_exact() {
        let store = PerfStore::in_memory().unwrap();
        for duration in 1..=100 {
            store.record(&sample("/api/x", f64::from(duration), 200, false)).unwrap();
        }
        let stats = store.route_stats("/api/x", 7).unwrap();
        assert_eq!(stats.p50_ms, 50.0);
        assert_eq!(stats.p95_ms, 95.0);
        assert_eq!(stats.p99_ms, 99.0);
    }

    #[test]
    fn test_empty_route_stats() {
        let store = PerfStore::in_memory().unwrap();
        let stats = store.route_stats("/missing", 7).unwrap();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean_ms, 0.0);
    }

    #[test]
    fn test_slowest_routes_ordering() {
        let store = PerfStore::in_memory().unwrap();
        store.record(&sample("/fast", 5.0, 200, false)).unwrap();
        store.record(&sample("/slow", 500.0, 200, false)).unwrap();
        store.record(&sample("/medium", 50.0, 200, false)).unwrap();

        let slowest = store.slowest_routes(2, 7).unwrap();
        assert_eq!(slowest.len(), 2);
        assert_eq!(slowest[0].route, "/slow");
        assert_eq!(slowest[1].route, "/medium");
    }

    #[test]
    fn test_rotate_deletes_old_rows() {
        let store = PerfStore::in_memory().unwrap();
        let mut old = sample("/api/metrics", 10.0, 200, false);
        old.timestamp = Utc::now() - Duration::days(40);
        store.record(&old).unwrap();
        store.record(&sample("/api/metrics", 10.0, 200, false)).unwrap();

        let removed = store.rotate(30).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.route_stats("/api/metrics", 60).unwrap().count, 1);
    }

    #[test]
    fn test_health_score_all_good() {
        let store = PerfStore::in_memory().unwrap();
        for _ in 0..10 {
            store.record(&sample("/api/metrics", 50.0, 200, true)).unwrap();
        }
        let health = store.health_score(7).unwrap();
        assert_eq!(health.score, 100.0);
        assert_eq!(health.grade, 'A');
    }

    #[test]
    fn test_health_score_degrades_with_errors() {
        let store = PerfStore::in_memory().unwrap();
        for i in 0..10 {
            let status = if i < 5 { 500 } else { 200 };
            store.record(&sample("/api/metrics", 50.0, status, false)).unwrap();
        }
        let health = store.health_score(7).unwrap();
        // latency 100 * 0.4 + cache 0 * 0.3 + errors 50 * 0.3 = 55 → F.
        assert_eq!(health.score, 55.0);
        assert_eq!(health.grade, 'F');
        assert_eq!(health.sample_count, 10);
    }

    #[test]
    fn test_grade_breakpoints() {
        assert_eq!(grade_for(90.0), 'A');
        assert_eq!(grade_for(89.9), 'B');
        assert_eq!(grade_for(80.0), 'B');
        assert_eq!(grade_for(70.0), 'C');
        assert_eq!(grade_for(60.0), 'D');
        assert_eq!(grade_for(59.9), 'F');
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf.db");
        {
            let store = PerfStore::open(&path).unwrap();
            store.record(&sample("/api/metrics", 10.0, 200, false)).unwrap();
        }
        // Rows survive reopen.
        let store = PerfStore::open(&path).unwrap();
        assert_eq!(store.route_stats("/api/metrics", 7).unwrap().count, 1);
    }
}
