//! `biomon` - biomonitoring trend analysis CLI.
//!
//! ## Commands
//!
//! - `run`: full pipeline; writes report.json, tables.txt and recent_samples.csv
//! - `stations`: print per-station aggregates and which stations qualify
//! - `recent`: write only the most-recent-sample CSV

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use biomon_trends::analysis::filter_stations;
use biomon_trends::config::AnalysisConfig;
use biomon_trends::ingest::load_samples_file;
use biomon_trends::logging::{self, Stage};
use biomon_trends::model::Result;
use biomon_trends::pipeline::{recent_records, run_analysis};
use biomon_trends::report::{print_summary, write_outputs, write_recent_csv};
use biomon_trends::stations::load_stations_file;

#[derive(Parser)]
#[command(name = "biomon")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ordinal trend analysis of stream biomonitoring grades", long_about = None)]
struct Cli {
    /// TOML configuration file (default: ./biomon.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Timestamp console log lines
    #[arg(long, global = true)]
    timestamps: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter stations, fit models, predict and write the report
    Run(InputArgs),

    /// Print station aggregates and the filter outcome
    Stations(InputArgs),

    /// Write the most recent sample per station as CSV
    Recent(InputArgs),
}

/// Overrides for the configured inputs and thresholds.
#[derive(Args, Clone)]
struct InputArgs {
    /// Sample table CSV
    #[arg(long, env = "BIOMON_SAMPLES")]
    samples: Option<PathBuf>,

    /// Station metadata CSV
    #[arg(long, env = "BIOMON_STATIONS")]
    stations: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, env = "BIOMON_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Sample type to analyse
    #[arg(long)]
    sample_type: Option<String>,

    /// Minimum number of graded samples per station (k)
    #[arg(short = 'k', long)]
    min_samples: Option<usize>,

    /// Minimum span in years between first and last sample (s)
    #[arg(short = 's', long)]
    min_year_span: Option<i32>,

    /// Year subtracted from sample years before fitting
    #[arg(long)]
    reference_year: Option<i32>,
}

impl InputArgs {
    fn apply(&self, config: &mut AnalysisConfig) {
        if let Some(p) = &self.samples {
            config.samples_path = p.clone();
        }
        if let Some(p) = &self.stations {
            config.stations_path = p.clone();
        }
        if let Some(p) = &self.output_dir {
            config.output_dir = p.clone();
        }
        if let Some(t) = &self.sample_type {
            config.sample_type = t.clone();
        }
        if let Some(k) = self.min_samples {
            config.min_samples = k;
        }
        if let Some(s) = self.min_year_span {
            config.min_year_span = s;
        }
        if let Some(y) = self.reference_year {
            config.reference_year = y;
        }
    }
}

fn load_config(cli: &Cli, args: &InputArgs) -> Result<AnalysisConfig> {
    let mut config = AnalysisConfig::load(cli.config.as_deref())?;
    config.apply_env_overrides();
    args.apply(&mut config);
    if cli.verbose {
        config.log_level = "debug".to_string();
    }
    config.validate()?;
    Ok(config)
}

fn execute(cli: &Cli) -> Result<()> {
    let args = match &cli.command {
        Commands::Run(a) | Commands::Stations(a) | Commands::Recent(a) => a,
    };
    let config = load_config(cli, args)?;

    let log_file = config.log_file.as_ref().map(|p| p.display().to_string());
    logging::init_logger(config.log_level()?, log_file.as_deref(), cli.timestamps);

    let samples = load_samples_file(&config.samples_path)?;

    match &cli.command {
        Commands::Run(_) => {
            let registry = load_stations_file(&config.stations_path)?;
            let run = run_analysis(&config, &samples, &registry);
            let recent = recent_records(&config, &samples.records);
            let paths = write_outputs(&config.output_dir, &run.report, &recent, &registry)?;
            print_summary(&run.report);
            println!("\nReport:  {}", paths.json.display());
            println!("Tables:  {}", paths.tables.display());
            println!("Recent:  {}", paths.recent_csv.display());
        }
        Commands::Stations(_) => {
            let outcome = filter_stations(&samples.records, &config.criteria());
            println!(
                "{:<12} {:>7} {:>6} {:>6} {:>5}  {:<12} {}",
                "Station", "Samples", "First", "Last", "Span", "Grades", "Modelled"
            );
            for aggregate in outcome.aggregates.values() {
                let grades: Vec<&str> = aggregate.grades.iter().map(|g| g.label()).collect();
                let modelled = outcome.retained.contains(&aggregate.station_id);
                println!(
                    "{:<12} {:>7} {:>6} {:>6} {:>5}  {:<12} {}",
                    aggregate.station_id,
                    aggregate.sample_count,
                    aggregate.first_year,
                    aggregate.last_year,
                    aggregate.year_span,
                    grades.join("/"),
                    if modelled { "yes" } else { "no" }
                );
            }
            println!(
                "\n{} of {} station(s) qualify for modelling",
                outcome.retained.len(),
                outcome.aggregates.len()
            );
        }
        Commands::Recent(_) => {
            let registry = load_stations_file(&config.stations_path)?;
            let recent = recent_records(&config, &samples.records);
            let path = write_recent_csv(&config.output_dir, &recent, &registry)?;
            println!("Wrote {} record(s) to {}", recent.len(), path.display());
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match execute(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if logging::is_initialized() {
                logging::error(Stage::System, None, &e.to_string());
            } else {
                eprintln!("biomon: {}", e);
            }
            ExitCode::FAILURE
        }
    }
}
