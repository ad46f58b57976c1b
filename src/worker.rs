//! Worker — one Page Driver, one exclusive-use lock, both Sinks, one run
//! date (§4.4). `run_job` is the only operation; it never lets a Page
//! Driver failure escape as an exception, only as `false` plus a log line
//! (§7, "Propagation policy").

use crate::driver::{as_raw_row, PageDriver};
use crate::record::Record;
use crate::run_metrics::MetricsReporter;
use crate::sinks::csv::CsvSink;
use crate::sinks::db::{DbSink, DbSinkFactory, InsertOutcome};
use chrono::NaiveDate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

pub struct Worker<D: PageDriver> {
    pub id: usize,
    driver: Option<D>,
    /// Opened fresh at the start of each job and dropped at its end — the
    /// connection is never shared across Workers or reused across jobs
    /// (§4.2).
    db_factory: Arc<dyn DbSinkFactory>,
    csv_sink: Arc<dyn CsvSink>,
    date: NaiveDate,
    data_type: String,
    metrics: Arc<dyn MetricsReporter>,
    /// Set for the duration of `run_job`, asserting the Pool held this
    /// Worker's lock before dispatch (§4.4 step 1).
    locked: AtomicBool,
}

impl<D: PageDriver> Worker<D> {
    pub fn new(
        id: usize,
        driver: D,
        db_factory: Arc<dyn DbSinkFactory>,
        csv_sink: Arc<dyn CsvSink>,
        date: NaiveDate,
        data_type: impl Into<String>,
        metrics: Arc<dyn MetricsReporter>,
    ) -> Self {
        Worker {
            id,
            driver: Some(driver),
            db_factory,
            csv_sink,
            date,
            data_type: data_type.into(),
            metrics,
            locked: AtomicBool::new(false),
        }
    }

    /// True once the Page Driver has been torn down after a fatal failure;
    /// the Worker stays in the pool (idle) but can no longer take jobs.
    pub fn session_terminated(&self) -> bool {
        self.driver.is_none()
    }

    /// Called by the Pool immediately before dispatch; panics if the lock
    /// was already held, which would mean the Pool's own invariant (at most
    /// one job per Worker) broke (§4.5 invariant 1).
    pub fn acquire(&self) {
        let already_locked = self.locked.swap(true, Ordering::AcqRel);
        assert!(!already_locked, "worker {} dispatched while already locked", self.id);
    }

    fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Drops the Page Driver, called by the Pool once per Worker after the
    /// job queue has drained (§4.5 teardown).
    pub fn shutdown(&mut self) {
        self.driver = None;
    }

    /// Executes one (os, region) job end to end. Never panics on a Page
    /// Driver or sink failure; returns `false` and logs instead (§4.4, §7).
    pub async fn run_job(&mut self, os: &str, region: &str) -> bool {
        assert!(self.locked.load(Ordering::Acquire), "run_job called without the lock held");

        let Some(driver) = self.driver.as_mut() else {
            warn!(worker_id = self.id, os, region, "session already terminated, skipping job");
            self.release();
            return false;
        };

        if let Err(e) = driver.select_os(os).await {
            warn!(worker_id = self.id, os, region, error = %e, "select_os failed");
            self.release();
            return false;
        }
        if let Err(e) = driver.select_region(region).await {
            warn!(worker_id = self.id, os, region, error = %e, "select_region failed");
            self.release();
            return false;
        }

        let rows = match driver.iterate_rows().await {
            Ok(rows) => rows,
            Err(e) => {
                error!(worker_id = self.id, os, region, error = %e, "iterate_rows failed, tearing down session");
                self.driver = None;
                self.metrics.record_error();
                self.release();
                return false;
            }
        };

        // Opened once for this job and dropped at the end of the function —
        // never held across jobs (§4.2).
        let mut db_sink = match self.db_factory.open().await {
            Ok(sink) => Some(sink),
            Err(e) => {
                warn!(worker_id = self.id, os, region, error = %e, "db connection failed, job continues CSV-only");
                self.metrics.record_error();
                None
            }
        };

        let mut collected = Vec::with_capacity(rows.len());
        let mut duplicates = 0u64;
        for cells in &rows {
            let raw = as_raw_row(cells);
            let record = match Record::normalize(self.date, region, os, raw) {
                Ok(r) => r,
                Err(e) => {
                    warn!(worker_id = self.id, os, region, error = %e, "skipping malformed row");
                    self.metrics.record_error();
                    continue;
                }
            };

            if let Some(sink) = db_sink.as_mut() {
                match sink.insert(&record).await {
                    Ok(InsertOutcome::Stored) => self.metrics.record_stored(),
                    Ok(InsertOutcome::Duplicate) => {
                        duplicates += 1;
                        self.metrics.record_duplicate();
                    }
                    Err(e) => {
                        warn!(worker_id = self.id, os, region, error = %e, "db insert failed");
                        self.metrics.record_error();
                    }
                }
            }

            collected.push(record);
        }
        drop(db_sink);

        if duplicates > 0 {
            warn!(worker_id = self.id, os, region, duplicates, "duplicate primary keys in this job");
        }

        let write_result = self.csv_sink.write(&self.data_type, &self.date.to_string(), os, region, &collected);
        if let Err(e) = write_result {
            warn!(worker_id = self.id, os, region, error = %e, "csv write failed");
            self.metrics.record_error();
        }

        self.release();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::TableState;
    use crate::error::EngineError;
    use crate::run_metrics::RunMetrics;
    use crate::sinks::db::FakeDbSinkFactory;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakePageDriver {
        rows: Vec<[String; 6]>,
        fail_select_os: bool,
        fail_iterate: bool,
    }

    #[async_trait]
    impl PageDriver for FakePageDriver {
        async fn list_regions(&mut self) -> Result<Vec<String>, EngineError> {
            Ok(vec!["us-east-1".into()])
        }
        async fn list_operating_systems(&mut self) -> Result<Vec<String>, EngineError> {
            Ok(vec!["Linux".into()])
        }
        async fn select_os(&mut self, _name: &str) -> Result<(), EngineError> {
            if self.fail_select_os {
                Err(EngineError::Driver("UnknownOS: boom".into()))
            } else {
                Ok(())
            }
        }
        async fn select_region(&mut self, _name: &str) -> Result<(), EngineError> {
            Ok(())
        }
        async fn iterate_rows(&mut self) -> Result<Vec<[String; 6]>, EngineError> {
            if self.fail_iterate {
                Err(EngineError::Driver("dom vanished mid-page".into()))
            } else {
                Ok(self.rows.clone())
            }
        }
        fn state(&self) -> TableState {
            TableState::Filtered
        }
    }

    struct FakeCsvSink {
        last_count: Mutex<usize>,
    }

    impl CsvSink for FakeCsvSink {
        fn write(
            &self,
            _data_type: &str,
            _date: &str,
            _operating_system: &str,
            _region: &str,
            records: &[Record],
        ) -> Result<std::path::PathBuf, EngineError> {
            *self.last_count.lock().unwrap() = records.len();
            Ok(std::path::PathBuf::from("/dev/null"))
        }
    }

    fn rows() -> Vec<[String; 6]> {
        vec![
            [
                "t3.nano".into(),
                "$0.0052".into(),
                "2".into(),
                "0.5 GiB".into(),
                "EBS Only".into(),
                "Up to 5 Gigabit".into(),
            ],
            [
                "t3.micro".into(),
                "$0.0104".into(),
                "2".into(),
                "1 GiB".into(),
                "EBS Only".into(),
                "Up to 5 Gigabit".into(),
            ],
        ]
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 26).unwrap()
    }

    #[tokio::test]
    async fn successful_job_stores_all_rows_and_writes_csv_once() {
        let driver = FakePageDriver { rows: rows(), fail_select_os: false, fail_iterate: false };
        let csv = Arc::new(FakeCsvSink { last_count: Mutex::new(0) });
        let metrics = Arc::new(RunMetrics::new(date(), 1, 1, 1, "test".into()));
        let db_factory: Arc<dyn DbSinkFactory> = Arc::new(FakeDbSinkFactory::default());
        let mut worker = Worker::new(0, driver, db_factory, csv.clone(), date(), "ec2", metrics.clone());

        worker.acquire();
        let ok = worker.run_job("Linux", "us-east-1").await;

        assert!(ok);
        assert_eq!(metrics.stored(), 2);
        assert_eq!(*csv.last_count.lock().unwrap(), 2);
        assert!(!worker.session_terminated());
    }

    #[tokio::test]
    async fn select_os_failure_returns_false_without_touching_sinks() {
        let driver = FakePageDriver { rows: rows(), fail_select_os: true, fail_iterate: false };
        let csv = Arc::new(FakeCsvSink { last_count: Mutex::new(0) });
        let metrics = Arc::new(RunMetrics::new(date(), 1, 1, 1, "test".into()));
        let db_factory: Arc<dyn DbSinkFactory> = Arc::new(FakeDbSinkFactory::default());
        let mut worker = Worker::new(0, driver, db_factory, csv.clone(), date(), "ec2", metrics.clone());

        worker.acquire();
        let ok = worker.run_job("Linux", "us-east-1").await;

        assert!(!ok);
        assert_eq!(metrics.stored(), 0);
        assert_eq!(*csv.last_count.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn iterate_rows_failure_tears_down_session_and_returns_false() {
        let driver = FakePageDriver { rows: rows(), fail_select_os: false, fail_iterate: true };
        let csv = Arc::new(FakeCsvSink { last_count: Mutex::new(0) });
        let metrics = Arc::new(RunMetrics::new(date(), 1, 1, 1, "test".into()));
        let db_factory: Arc<dyn DbSinkFactory> = Arc::new(FakeDbSinkFactory::default());
        let mut worker = Worker::new(0, driver, db_factory, csv, date(), "ec2", metrics.clone());

        worker.acquire();
        let ok = worker.run_job("Linux", "us-east-1").await;

        assert!(!ok);
        assert!(worker.session_terminated());
        assert_eq!(metrics.error_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_inserts_across_separate_jobs_are_tallied_but_do_not_fail_the_job() {
        let db_factory = FakeDbSinkFactory::default();
        {
            let mut first_conn = db_factory.open().await.unwrap();
            first_conn.insert(&Record::normalize(date(), "us-east-1", "Linux", crate::record::RawRow {
                instance_type: "t3.nano",
                cost_per_hour: "$0.0052",
                cpu_count: "2",
                ram: "0.5 GiB",
                storage_description: "EBS Only",
                network_description: "Up to 5 Gigabit",
            }).unwrap()).await.unwrap();
        }

        let driver = FakePageDriver { rows: vec![rows()[0].clone()], fail_select_os: false, fail_iterate: false };
        let csv = Arc::new(FakeCsvSink { last_count: Mutex::new(0) });
        let metrics = Arc::new(RunMetrics::new(date(), 1, 1, 1, "test".into()));
        let db_factory: Arc<dyn DbSinkFactory> = Arc::new(db_factory);
        let mut worker = Worker::new(0, driver, db_factory, csv, date(), "ec2", metrics.clone());

        worker.acquire();
        let ok = worker.run_job("Linux", "us-east-1").await;

        assert!(ok);
        assert_eq!(metrics.duplicates(), 1);
        assert_eq!(metrics.stored(), 0);
    }

    #[tokio::test]
    #[should_panic(expected = "without the lock held")]
    async fn run_job_without_acquire_panics() {
        let driver = FakePageDriver { rows: rows(), fail_select_os: false, fail_iterate: false };
        let csv = Arc::new(FakeCsvSink { last_count: Mutex::new(0) });
        let metrics = Arc::new(RunMetrics::new(date(), 1, 1, 1, "test".into()));
        let db_factory: Arc<dyn DbSinkFactory> = Arc::new(FakeDbSinkFactory::default());
        let mut worker = Worker::new(0, driver, db_factory, csv, date(), "ec2", metrics);
        worker.run_job("Linux", "us-east-1").await;
    }
}
