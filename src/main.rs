//! # Main — CLI Entry Point
//!
//! Routes CLI subcommands to the Run Controller, the size-check report, the
//! standalone Archiver, and the HTTP control surface.
//!
//! ## Global Options
//!
//! - `--database-url` / `DATABASE_URL`: PostgreSQL connection for both sinks
//!   and the Run Metrics table.
//! - `--pricing-page-url`: the remote pricing page the Page Driver drives.
//! - `--no-headless`: run the underlying browser with a visible window
//!   instead of headless.

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "ec2harvest", about = "Harvest EC2 on-demand pricing into Postgres and CSV")]
struct Cli {
    /// PostgreSQL connection URL (or set DATABASE_URL env var)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Remote pricing page the Page Driver drives
    #[arg(long, env = "PRICING_PAGE_URL", default_value = "https://aws.amazon.com/ec2/pricing/on-demand/")]
    pricing_page_url: String,

    /// Run the underlying browser with a visible window instead of headless
    #[arg(long)]
    no_headless: bool,

    /// Browser window width
    #[arg(long, default_value_t = 1280)]
    window_width: u32,

    /// Browser window height
    #[arg(long, default_value_t = 900)]
    window_height: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the harvest engine for today's date
    Run {
        /// Requested worker count
        #[arg(long, default_value_t = 4)]
        thread_count: u32,

        /// Disable the hardware-concurrency clamp on thread_count
        #[arg(long)]
        overdrive_madness: bool,

        /// Roll the day's CSV tree into a single archive after the run
        #[arg(long)]
        compress: bool,

        /// Allow-list of regions (comma-separated); defaults to the full catalog
        #[arg(long, value_delimiter = ',')]
        regions: Option<Vec<String>>,

        /// Allow-list of operating systems (comma-separated); defaults to the full catalog
        #[arg(long, value_delimiter = ',')]
        operating_systems: Option<Vec<String>>,

        /// Print the discovered operating system catalog and exit without running
        #[arg(long)]
        get_operating_systems: bool,

        /// Print the discovered region catalog and exit without running
        #[arg(long)]
        get_regions: bool,

        /// Disable the CSV sink
        #[arg(long)]
        no_store_csv: bool,

        /// Disable the DB sink
        #[arg(long)]
        no_store_db: bool,

        /// Root directory for the CSV filesystem layout
        #[arg(long, default_value = "./data")]
        csv_data_dir: PathBuf,
    },
    /// Print the current CSV tree size and DB row count, then exit
    CheckSize {
        #[arg(long, default_value = "./data")]
        csv_data_dir: PathBuf,
    },
    /// Archive a prior date's CSV tree without running a harvest
    Archive {
        #[arg(long, default_value = "./data")]
        csv_data_dir: PathBuf,

        /// Date to archive, YYYY-MM-DD
        #[arg(long)]
        date: String,
    },
    /// Launch the HTTP control surface (GET /status, POST /run)
    Serve {
        #[arg(long, default_value_t = 7001)]
        port: u16,
    },
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt().json().with_target(false).init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();
    cli::dispatch(&cli)
}
