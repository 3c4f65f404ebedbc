//! Command line front end: process a location, rebuild its database and
//! query pasture statistics.

use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use rangesat::pipeline::{build_database, process_location};
use rangesat::store::aggregate::{self, MonthDay};
use rangesat::{AggFunc, LocationConfig, ResultStore, Scene, StatsFilter};

#[derive(Parser)]
#[command(name = "rangesat")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Landsat rangeland biomass processing", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every scene of a location and rebuild its database
    Process {
        /// Location YAML configuration
        config: PathBuf,
        /// Reprocess scenes that already have output or a failure marker
        #[arg(long)]
        overwrite: bool,
    },
    /// Merge the per-scene CSV files into the location database
    BuildDb { config: PathBuf },
    /// Print the metadata of a scene directory or archive
    Inspect { scene: PathBuf },
    /// Query stored pasture statistics as CSV on stdout
    Query(QueryArgs),
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum QueryMode {
    Rows,
    ByPasture,
    Intrayear,
    Interyear,
    Multiyear,
}

#[derive(clap::Args)]
struct QueryArgs {
    config: PathBuf,
    #[arg(long, value_enum, default_value = "rows")]
    mode: QueryMode,
    #[arg(long)]
    ranch: Option<String>,
    #[arg(long)]
    pasture: Option<String>,
    /// Acquisition date (YYYY-MM-DD)
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long)]
    year: Option<i32>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, default_value = "mean")]
    agg: AggFunc,
    /// Season start (MM-DD), exclusive
    #[arg(long, default_value = "05-01")]
    start: MonthDay,
    /// Season end (MM-DD), exclusive
    #[arg(long, default_value = "10-01")]
    end: MonthDay,
    #[arg(long)]
    start_year: Option<i32>,
    #[arg(long)]
    end_year: Option<i32>,
}

fn write_csv<T: Serialize>(rows: &[T]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout().lock());
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn query(args: QueryArgs) -> anyhow::Result<()> {
    let config = LocationConfig::load(&args.config)?;
    let db_path = config.db_path();
    if !db_path.exists() {
        bail!("{} does not exist, run build-db first", db_path.display());
    }
    let store = ResultStore::open(&db_path)?;

    let filter = StatsFilter {
        ranch: args.ranch,
        pasture: args.pasture,
        acquisition_date: args.date,
        model: args.model,
        year: if args.mode == QueryMode::Rows { args.year } else { None },
        ..Default::default()
    };
    let rows = store.query(&filter)?;

    let year_range = || -> anyhow::Result<(i32, i32)> {
        match (args.start_year, args.end_year) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => bail!("--start-year and --end-year are required"),
        }
    };

    match args.mode {
        QueryMode::Rows => write_csv(&rows),
        QueryMode::ByPasture => write_csv(&aggregate::aggregate_by_pasture(&rows, args.agg)),
        QueryMode::Intrayear => {
            let year = args.year.context("--year is required for intrayear")?;
            write_csv(&aggregate::intrayear(&rows, year, args.start, args.end, args.agg)?)
        }
        QueryMode::Interyear => {
            let (a, b) = year_range()?;
            write_csv(&aggregate::interyear(&rows, a, b, args.start, args.end, args.agg)?)
        }
        QueryMode::Multiyear => {
            let (a, b) = year_range()?;
            write_csv(&aggregate::multiyear(&rows, a, b, args.start, args.end, args.agg)?)
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level)).init();

    match cli.command {
        Command::Process { config, overwrite } => {
            let config = LocationConfig::load(&config)?;
            let report = process_location(&config, overwrite)?;
            println!(
                "processed {}, skipped {}, failed {}",
                report.processed.len(),
                report.skipped.len(),
                report.failed.len()
            );
            for (scene, reason) in &report.failed {
                println!("  failed {}: {}", scene, reason);
            }
        }
        Command::BuildDb { config } => {
            let config = LocationConfig::load(&config)?;
            let rows = build_database(&config.out_dir, &config.db_path())?;
            println!("{} rows in {}", rows, config.db_path().display());
        }
        Command::Inspect { scene } => {
            let scene = Scene::open(&scene)?;
            print!("{}", serde_yaml::to_string(&scene.summary()?)?);
            println!("bands: {}", scene.band_names().join(", "));
        }
        Command::Query(args) => query(args)?,
    }
    Ok(())
}
