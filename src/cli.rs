//! CLI execution functions — extracted from `main.rs` to keep the entry
//! point slim. Each subcommand builds the collaborators it needs (driver
//! factory, DB sink factory, Status store) and hands them to the Run
//! Controller or the HTTP surface; this module owns no engine logic itself.

use anyhow::{Context, Result};
use ec2harvest::api::{self, ApiState};
use ec2harvest::archiver;
use ec2harvest::controller::{self, RunController, RunOutcome, RunRequest};
use ec2harvest::driver::ChromeDriverFactory;
use ec2harvest::sinks::db::PgDbSinkFactory;
use ec2harvest::status::{InProcessStatus, StatusStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::{Cli, Commands};

pub fn hardware_concurrency() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn driver_factory(cli: &Cli) -> Arc<ChromeDriverFactory> {
    Arc::new(ChromeDriverFactory {
        url: cli.pricing_page_url.clone(),
        headless: !cli.no_headless,
        window: (cli.window_width, cli.window_height),
    })
}

fn require_database_url(cli: &Cli) -> Result<String> {
    cli.database_url
        .clone()
        .context("DATABASE_URL is required (set via --database-url or env)")
}

pub fn run_run(
    cli: &Cli,
    thread_count: u32,
    overdrive_madness: bool,
    compress: bool,
    regions: Option<Vec<String>>,
    operating_systems: Option<Vec<String>>,
    get_operating_systems: bool,
    get_regions: bool,
    store_csv: bool,
    store_db: bool,
    csv_data_dir: PathBuf,
) -> Result<()> {
    let database_url = require_database_url(cli)?;
    let status: Arc<dyn StatusStore> = Arc::new(InProcessStatus::default());
    let controller = RunController::new(
        status,
        driver_factory(cli),
        Arc::new(PgDbSinkFactory::new(database_url.clone())),
        Some(database_url),
        hardware_concurrency(),
    );

    let request = RunRequest {
        date: chrono::Local::now().date_naive(),
        thread_count,
        overdrive_madness,
        compress,
        regions,
        operating_systems,
        get_operating_systems,
        get_regions,
        store_csv,
        store_db,
        csv_data_dir,
        command_line: std::env::args().collect::<Vec<_>>().join(" "),
    };

    let rt = tokio::runtime::Runtime::new()?;
    match rt.block_on(controller.run(request))? {
        RunOutcome::CatalogPrinted { operating_systems, regions } => {
            println!("operating systems: {}", operating_systems.join(", "));
            println!("regions: {}", regions.join(", "));
        }
        RunOutcome::Completed(row) => {
            info!(
                errors = row.error_count,
                run_seconds = row.run_seconds,
                "run complete"
            );
        }
    }
    Ok(())
}

pub fn run_check_size(cli: &Cli, csv_data_dir: PathBuf) -> Result<()> {
    let database_url = require_database_url(cli)?;
    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(controller::check_size(&csv_data_dir, "ec2", &database_url))?;
    println!("csv tree bytes: {}", report.csv_tree_bytes);
    println!("db row count: {}", report.db_row_count);
    Ok(())
}

pub fn run_archive(cli: &Cli, csv_data_dir: PathBuf, date: String) -> Result<()> {
    let _ = cli;
    let target = archiver::archive(&csv_data_dir, "ec2", &date)?;
    println!("archived to {}", target.display());
    Ok(())
}

pub fn run_serve(cli: &Cli, port: u16) -> Result<()> {
    let database_url = require_database_url(cli)?;
    let status: Arc<dyn StatusStore> = Arc::new(InProcessStatus::default());
    let controller = Arc::new(RunController::new(
        status.clone(),
        driver_factory(cli),
        Arc::new(PgDbSinkFactory::new(database_url.clone())),
        Some(database_url),
        hardware_concurrency(),
    ));
    let state = Arc::new(ApiState { status, controller, csv_data_dir: PathBuf::from("./data") });

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let app = api::router(state);
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
        info!(port, "listening");
        axum::serve(listener, app).await?;
        anyhow::Ok(())
    })
}

pub fn dispatch(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Run {
            thread_count,
            overdrive_madness,
            compress,
            regions,
            operating_systems,
            get_operating_systems,
            get_regions,
            no_store_csv,
            no_store_db,
            csv_data_dir,
        } => run_run(
            cli,
            *thread_count,
            *overdrive_madness,
            *compress,
            regions.clone(),
            operating_systems.clone(),
            *get_operating_systems,
            *get_regions,
            !no_store_csv,
            !no_store_db,
            csv_data_dir.clone(),
        ),
        Commands::CheckSize { csv_data_dir } => run_check_size(cli, csv_data_dir.clone()),
        Commands::Archive { csv_data_dir, date } => run_archive(cli, csv_data_dir.clone(), date.clone()),
        Commands::Serve { port } => run_serve(cli, *port),
    }
}
