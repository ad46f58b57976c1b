//! Run Metrics — one row per run, threaded into Workers through a narrow
//! increment-only reporter interface rather than a process-wide global
//! (Design Notes, "Global mutable state").

use chrono::NaiveDate;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Increment-only surface a Worker holds; it never reads metrics back, only
/// reports into them.
pub trait MetricsReporter: Send + Sync {
    fn record_stored(&self);
    fn record_duplicate(&self);
    fn record_error(&self);
    fn record_csv_bytes(&self, delta: i64);
    fn record_db_bytes(&self, delta: i64);
}

/// Owned by the Run Controller for the lifetime of one run; `Arc`-shared
/// read-only (via the trait) into every Worker.
pub struct RunMetrics {
    date: NaiveDate,
    thread_count: u32,
    os_count: u32,
    region_count: u32,
    command_line: String,
    stored: AtomicU64,
    duplicate: AtomicU64,
    errors: AtomicU64,
    csv_bytes_delta: AtomicI64,
    db_bytes_delta: AtomicI64,
}

impl RunMetrics {
    pub fn new(date: NaiveDate, thread_count: u32, os_count: u32, region_count: u32, command_line: String) -> Self {
        RunMetrics {
            date,
            thread_count,
            os_count,
            region_count,
            command_line,
            stored: AtomicU64::new(0),
            duplicate: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            csv_bytes_delta: AtomicI64::new(0),
            db_bytes_delta: AtomicI64::new(0),
        }
    }

    pub fn stored(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicate.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Closes out the run with the two timings only the Run Controller can
    /// measure (time to resolve catalogs, time to drain the pool) into the
    /// row the metrics table expects (§3, §6).
    pub fn finalize(&self, init_seconds: f64, run_seconds: f64) -> RunMetricsRow {
        RunMetricsRow {
            date: self.date,
            thread_count: self.thread_count,
            os_count: self.os_count,
            region_count: self.region_count,
            init_seconds,
            run_seconds,
            csv_bytes_delta: self.csv_bytes_delta.load(Ordering::Relaxed),
            db_bytes_delta: self.db_bytes_delta.load(Ordering::Relaxed),
            error_count: self.errors.load(Ordering::Relaxed),
            command_line: self.command_line.clone(),
        }
    }
}

impl MetricsReporter for RunMetrics {
    fn record_stored(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    fn record_duplicate(&self) {
        self.duplicate.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_csv_bytes(&self, delta: i64) {
        self.csv_bytes_delta.fetch_add(delta, Ordering::Relaxed);
    }

    fn record_db_bytes(&self, delta: i64) {
        self.db_bytes_delta.fetch_add(delta, Ordering::Relaxed);
    }
}

/// The row appended to `metric_data` on run completion (§3, §6).
#[derive(Debug, Clone, PartialEq)]
pub struct RunMetricsRow {
    pub date: NaiveDate,
    pub thread_count: u32,
    pub os_count: u32,
    pub region_count: u32,
    pub init_seconds: f64,
    pub run_seconds: f64,
    pub csv_bytes_delta: i64,
    pub db_bytes_delta: i64,
    pub error_count: u64,
    pub command_line: String,
}

impl RunMetricsRow {
    pub async fn persist(&self, conn: &mut sqlx::PgConnection) -> Result<(), crate::error::EngineError> {
        sqlx::query(
            r#"
            INSERT INTO metric_data
                (date, thread_count, os_count, region_count, init_seconds, run_seconds,
                 csv_bytes_delta, db_bytes_delta, error_count, command_line)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(self.date)
        .bind(self.thread_count as i32)
        .bind(self.os_count as i32)
        .bind(self.region_count as i32)
        .bind(self.init_seconds)
        .bind(self.run_seconds)
        .bind(self.csv_bytes_delta)
        .bind(self.db_bytes_delta)
        .bind(self.error_count as i64)
        .bind(&self.command_line)
        .execute(conn)
        .await
        .map_err(|e| crate::error::EngineError::Sink(format!("metrics append failed: {e}")))?;
        Ok(())
    }
}
