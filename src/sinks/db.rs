//! DB Sink — idempotent insert against `ec2_instance_pricing`.
//!
//! A Worker opens one connection per *job* (never a shared pool, and never
//! reused across jobs — §4.2, §5) and drops it when the job finishes.
//! Duplicate detection is delegated to the store's own unique constraint on
//! the primary key; the engine performs no de-duplication of its own (§5,
//! "Duplicate-detection consistency").

use crate::error::EngineError;
use crate::record::Record;
use async_trait::async_trait;
use sqlx::postgres::PgConnection;
use sqlx::{Connection, Row};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Stored,
    Duplicate,
}

/// A single `insert` operation, independently committed per call (§4.2: no
/// batch rollback semantics required or expected).
#[async_trait]
pub trait DbSink: Send + Sync {
    async fn insert(&mut self, record: &Record) -> Result<InsertOutcome, EngineError>;
}

/// Opens one fresh `DbSink` per job; the Worker drops it the moment the job
/// finishes rather than holding it for its own lifetime.
#[async_trait]
pub trait DbSinkFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn DbSink>, EngineError>;
}

/// Mirrors the teacher's `Database::connect` URL handling so credentials
/// with special characters survive.
pub struct PgDbSinkFactory {
    database_url: String,
}

impl PgDbSinkFactory {
    pub fn new(database_url: impl Into<String>) -> Self {
        PgDbSinkFactory {
            database_url: database_url.into(),
        }
    }
}

#[async_trait]
impl DbSinkFactory for PgDbSinkFactory {
    async fn open(&self) -> Result<Box<dyn DbSink>, EngineError> {
        let conn = PgConnection::connect(&self.database_url)
            .await
            .map_err(|e| EngineError::Sink(format!("db connect failed: {e}")))?;
        Ok(Box::new(PgDbSink { conn }))
    }
}

pub struct PgDbSink {
    conn: PgConnection,
}

#[async_trait]
impl DbSink for PgDbSink {
    async fn insert(&mut self, record: &Record) -> Result<InsertOutcome, EngineError> {
        let pk = record.primary_key();
        let row = sqlx::query(
            r#"
            INSERT INTO ec2_instance_pricing
                (primary_key, date, region, operating_system, instance_type,
                 cost_per_hour, cpu_count, ram_gib, storage_description, network_description)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (primary_key) DO NOTHING
            RETURNING primary_key
            "#,
        )
        .bind(&pk)
        .bind(record.date)
        .bind(&record.region)
        .bind(&record.operating_system)
        .bind(&record.instance_type)
        .bind(record.cost_per_hour)
        .bind(record.cpu_count as i32)
        .bind(record.ram_gib)
        .bind(&record.storage_description)
        .bind(&record.network_description)
        .fetch_optional(&mut self.conn)
        .await
        .map_err(|e| EngineError::Sink(format!("insert failed for {pk}: {e}")))?;

        Ok(match row {
            Some(r) => {
                let _: String = r.get("primary_key");
                InsertOutcome::Stored
            }
            None => InsertOutcome::Duplicate,
        })
    }
}

#[async_trait]
impl DbSink for Box<dyn DbSink> {
    async fn insert(&mut self, record: &Record) -> Result<InsertOutcome, EngineError> {
        (**self).insert(record).await
    }
}

/// In-memory test double used directly by sink-level unit tests.
#[derive(Default)]
pub struct FakeDbSink {
    pub seen: HashSet<String>,
}

#[async_trait]
impl DbSink for FakeDbSink {
    async fn insert(&mut self, record: &Record) -> Result<InsertOutcome, EngineError> {
        let pk = record.primary_key();
        if self.seen.insert(pk) {
            Ok(InsertOutcome::Stored)
        } else {
            Ok(InsertOutcome::Duplicate)
        }
    }
}

/// Test factory standing in for a per-job connection pool: every `open()`
/// call hands back a distinct `DbSink` value (mirroring "never reused across
/// jobs"), but all of them share one `seen` set so duplicate accounting
/// across jobs can be exercised without a live database.
#[derive(Default, Clone)]
pub struct FakeDbSinkFactory {
    seen: Arc<Mutex<HashSet<String>>>,
}

#[async_trait]
impl DbSinkFactory for FakeDbSinkFactory {
    async fn open(&self) -> Result<Box<dyn DbSink>, EngineError> {
        Ok(Box::new(SharedFakeDbSink { seen: self.seen.clone() }))
    }
}

struct SharedFakeDbSink {
    seen: Arc<Mutex<HashSet<String>>>,
}

#[async_trait]
impl DbSink for SharedFakeDbSink {
    async fn insert(&mut self, record: &Record) -> Result<InsertOutcome, EngineError> {
        let pk = record.primary_key();
        let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
        if seen.insert(pk) {
            Ok(InsertOutcome::Stored)
        } else {
            Ok(InsertOutcome::Duplicate)
        }
    }
}
