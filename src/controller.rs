//! Run Controller — builds the job list, owns run-level metrics, and
//! publishes lifecycle state to the Status collaborator (§4.6). The phase
//! sequence below is exactly the one in §4.6, including the unconditional
//! return to `idle` on every exit path (§7, "the lifecycle state always
//! returns to idle").

use crate::archiver;
use crate::driver::{DriverFactory, PageDriver};
use crate::error::EngineError;
use crate::pool::{Job, Pool};
use crate::run_metrics::{MetricsReporter, RunMetrics, RunMetricsRow};
use crate::sinks::csv::{CsvSink, FsCsvSink};
use crate::sinks::db::DbSinkFactory;
use crate::status::{self, StatusStore};
use crate::worker::Worker;
use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub struct RunRequest {
    pub date: NaiveDate,
    pub thread_count: u32,
    pub overdrive_madness: bool,
    pub compress: bool,
    pub regions: Option<Vec<String>>,
    pub operating_systems: Option<Vec<String>>,
    pub get_operating_systems: bool,
    pub get_regions: bool,
    pub store_csv: bool,
    pub store_db: bool,
    pub csv_data_dir: PathBuf,
    pub command_line: String,
}

pub enum RunOutcome {
    /// `get_operating_systems`/`get_regions` short-circuited the run.
    CatalogPrinted { operating_systems: Vec<String>, regions: Vec<String> },
    Completed(RunMetricsRow),
}

/// `n = min(user_request, hardware_concurrency)` unless overdrive is set, in
/// which case `n = user_request`; either way clamped to at least 1 (§4.6,
/// §8 boundary behaviors).
pub fn resolve_worker_count(thread_count: u32, overdrive_madness: bool, hardware_concurrency: usize) -> usize {
    let requested = thread_count.max(1) as usize;
    if overdrive_madness {
        requested
    } else {
        let clamped = requested.min(hardware_concurrency);
        if clamped < requested {
            warn!(requested, hardware_concurrency, "thread_count clamped to hardware concurrency");
        }
        clamped.max(1)
    }
}

pub struct RunController {
    status: Arc<dyn StatusStore>,
    driver_factory: Arc<dyn DriverFactory>,
    db_factory: Arc<dyn DbSinkFactory>,
    /// Used only to append the Run Metrics row; `None` when metrics
    /// persistence isn't configured (e.g. in tests using a fake DB factory).
    metrics_database_url: Option<String>,
    hardware_concurrency: usize,
    data_type: String,
}

impl RunController {
    pub fn new(
        status: Arc<dyn StatusStore>,
        driver_factory: Arc<dyn DriverFactory>,
        db_factory: Arc<dyn DbSinkFactory>,
        metrics_database_url: Option<String>,
        hardware_concurrency: usize,
    ) -> Self {
        RunController {
            status,
            driver_factory,
            db_factory,
            metrics_database_url,
            hardware_concurrency,
            data_type: "ec2".to_string(),
        }
    }

    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome, EngineError> {
        if let Err(current) = status::try_start(&self.status).await {
            return Err(EngineError::Config(format!("a run is already in progress ({current})")));
        }
        let result = self.run_inner(request).await;
        // Unconditional wrapper: idle on every exit path, success or failure (§4.6, §7).
        self.status.write(status::IDLE).await;
        result
    }

    async fn run_inner(&self, request: RunRequest) -> Result<RunOutcome, EngineError> {
        let init_started = Instant::now();
        self.status.write(status::COLLECTING_CATALOGS).await;

        let mut catalog_driver = self.driver_factory.launch().await?;
        let all_operating_systems = catalog_driver.list_operating_systems().await?;
        let all_regions = catalog_driver.list_regions().await?;
        drop(catalog_driver);

        let operating_systems = resolve_allow_list(&all_operating_systems, &request.operating_systems, "operating system")?;
        let regions = resolve_allow_list(&all_regions, &request.regions, "region")?;

        if request.get_operating_systems || request.get_regions {
            return Ok(RunOutcome::CatalogPrinted { operating_systems, regions });
        }

        let worker_count = resolve_worker_count(request.thread_count, request.overdrive_madness, self.hardware_concurrency);
        let metrics: Arc<dyn MetricsReporter> = Arc::new(RunMetrics::new(
            request.date,
            worker_count as u32,
            operating_systems.len() as u32,
            regions.len() as u32,
            request.command_line.clone(),
        ));

        self.status.write(status::RUNNING).await;
        let init_seconds = init_started.elapsed().as_secs_f64();
        let run_started = Instant::now();

        let jobs: Vec<Job> = operating_systems
            .iter()
            .flat_map(|os| regions.iter().map(move |region| (os.clone(), region.clone())))
            .collect();

        let csv_sink: Arc<dyn CsvSink> = Arc::new(FsCsvSink::new(request.csv_data_dir.clone()));
        let db_factory = if request.store_db { self.db_factory.clone() } else { Arc::new(NullDbSinkFactory) as Arc<dyn DbSinkFactory> };
        let effective_csv_sink: Arc<dyn CsvSink> =
            if request.store_csv { csv_sink } else { Arc::new(NullCsvSink) as Arc<dyn CsvSink> };

        // Snapshot sizes before dispatch so the post-run delta (§3, §4.6
        // "compute metrics deltas") reflects exactly this run's writes.
        let csv_tree_path = request.csv_data_dir.join(&self.data_type);
        let csv_bytes_before = if request.store_csv { directory_size(&csv_tree_path).unwrap_or(0) as i64 } else { 0 };
        let db_bytes_before = match (&self.metrics_database_url, request.store_db) {
            (Some(url), true) => table_size_bytes(url, "ec2_instance_pricing").await.unwrap_or(0),
            _ => 0,
        };

        let driver_factory = self.driver_factory.clone();
        let date = request.date;
        let data_type = self.data_type.clone();
        let metrics_for_pool = metrics.clone();
        let pool = Pool::build(worker_count, move |id| {
            let driver_factory = driver_factory.clone();
            let db_factory = db_factory.clone();
            let csv_sink = effective_csv_sink.clone();
            let metrics = metrics_for_pool.clone();
            let data_type = data_type.clone();
            async move {
                let driver = driver_factory.launch().await?;
                Ok(Worker::new(id, driver, db_factory, csv_sink, date, data_type, metrics))
            }
        })
        .await;

        pool.drain(jobs).await;

        let csv_bytes_after = if request.store_csv { directory_size(&csv_tree_path).unwrap_or(0) as i64 } else { 0 };
        let db_bytes_after = match (&self.metrics_database_url, request.store_db) {
            (Some(url), true) => table_size_bytes(url, "ec2_instance_pricing").await.unwrap_or(0),
            _ => 0,
        };
        metrics.record_csv_bytes(csv_bytes_after - csv_bytes_before);
        metrics.record_db_bytes(db_bytes_after - db_bytes_before);

        self.status.write(status::CLEANING_UP).await;
        let run_seconds = run_started.elapsed().as_secs_f64();

        if request.compress {
            if let Err(e) = archiver::archive(&request.csv_data_dir, &self.data_type, &request.date.to_string()) {
                warn!(error = %e, "archiving failed");
            }
        }

        let row = metrics.finalize(init_seconds, run_seconds);
        self.persist_metrics(&row).await;
        info!(error_count = row.error_count, "run complete");

        Ok(RunOutcome::Completed(row))
    }

    async fn persist_metrics(&self, row: &RunMetricsRow) {
        let Some(url) = &self.metrics_database_url else { return };
        use sqlx::Connection;
        match sqlx::PgConnection::connect(url).await {
            Ok(mut conn) => {
                if let Err(e) = row.persist(&mut conn).await {
                    warn!(error = %e, "failed to append run metrics row");
                }
            }
            Err(e) => warn!(error = %e, "failed to open connection for run metrics"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizeReport {
    pub csv_tree_bytes: u64,
    pub db_row_count: i64,
}

/// Backs the `check_size` run option: reports the current CSV tree size and
/// DB row count without starting a run (§6).
pub async fn check_size(csv_data_dir: &std::path::Path, data_type: &str, database_url: &str) -> Result<SizeReport, EngineError> {
    use sqlx::{Connection, Row};

    let csv_tree_bytes = directory_size(&csv_data_dir.join(data_type)).unwrap_or(0);

    let mut conn = sqlx::PgConnection::connect(database_url)
        .await
        .map_err(|e| EngineError::Sink(format!("db connect failed: {e}")))?;
    let row = sqlx::query("SELECT count(*) AS n FROM ec2_instance_pricing")
        .fetch_one(&mut conn)
        .await
        .map_err(|e| EngineError::Sink(format!("size query failed: {e}")))?;
    let db_row_count: i64 = row.get("n");

    Ok(SizeReport { csv_tree_bytes, db_row_count })
}

/// On-disk size of a table in bytes, including indexes and TOAST (matches
/// the original's `get_table_size`). Used only for the Run Metrics delta;
/// `check_size` reports a row count instead, which is more useful standalone.
async fn table_size_bytes(database_url: &str, table: &str) -> Result<i64, EngineError> {
    use sqlx::{Connection, Row};

    let mut conn = sqlx::PgConnection::connect(database_url)
        .await
        .map_err(|e| EngineError::Sink(format!("db connect failed: {e}")))?;
    let row = sqlx::query(&format!("SELECT pg_total_relation_size('{table}')::bigint AS n"))
        .fetch_one(&mut conn)
        .await
        .map_err(|e| EngineError::Sink(format!("table size query failed: {e}")))?;
    Ok(row.get("n"))
}

fn directory_size(dir: &std::path::Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                total += entry.metadata()?.len();
            }
        }
    }
    Ok(total)
}

fn resolve_allow_list(catalog: &[String], requested: &Option<Vec<String>>, kind: &str) -> Result<Vec<String>, EngineError> {
    match requested {
        None => Ok(catalog.to_vec()),
        Some(names) => {
            for name in names {
                if !catalog.iter().any(|c| c == name) {
                    return Err(EngineError::Config(format!("unknown {kind} in allow-list: {name}")));
                }
            }
            Ok(names.clone())
        }
    }
}

struct NullCsvSink;
impl CsvSink for NullCsvSink {
    fn write(
        &self,
        _data_type: &str,
        _date: &str,
        _operating_system: &str,
        _region: &str,
        _records: &[crate::record::Record],
    ) -> Result<PathBuf, EngineError> {
        Ok(PathBuf::new())
    }
}

struct NullDbSinkFactory;
#[async_trait::async_trait]
impl DbSinkFactory for NullDbSinkFactory {
    async fn open(&self) -> Result<Box<dyn crate::sinks::db::DbSink>, EngineError> {
        Ok(Box::new(crate::sinks::db::FakeDbSink::default()))
    }
}
