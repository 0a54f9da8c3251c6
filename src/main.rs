use anyhow::{Context, Result};
use bhavcopy::{
    asset::AssetClass,
    config::Config,
    extract::Extractor,
    fetch::{Acquirer, DateRange, Session, UrlResolver},
    logging,
    merge::{MasterAggregator, YearlyAggregator},
};
use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

/// Daily NSE bhavcopy and index-close pipeline.
#[derive(Parser, Debug)]
#[command(name = "bhavcopy", version, about)]
struct Cli {
    /// YAML config file (default: ./bhavcopy.yaml if present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download daily files for every day from 1 Jan START_YEAR to 31 Dec END_YEAR
    Download {
        start_year: i32,
        end_year: i32,
        #[arg(value_enum)]
        asset: AssetClass,
    },
    /// Unpack downloaded equity archives
    Extract,
    /// Build the yearly dataset of one asset class
    Merge {
        #[arg(value_enum)]
        asset: AssetClass,
        year: i32,
    },
    /// Concatenate all yearly datasets of one asset class
    Master {
        #[arg(value_enum)]
        asset: AssetClass,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Command::Download {
        start_year,
        end_year,
        ..
    } = cli.command
    {
        if start_year > end_year {
            Cli::command()
                .error(
                    ErrorKind::ValueValidation,
                    format!("START_YEAR {} is after END_YEAR {}", start_year, end_year),
                )
                .exit();
        }
    }

    let config = Config::load(cli.config.as_deref())?;
    config.ensure_dirs()?;
    logging::init(&config.paths.log_file());
    info!(command = ?cli.command, "startup");

    match cli.command {
        Command::Download {
            start_year,
            end_year,
            asset,
        } => {
            let range = DateRange::years(start_year, end_year)?;
            let resolver = UrlResolver::from_config(&config.remote)?;
            let session = Session::connect(&config.remote)?;
            let mut acquirer = Acquirer::new(session, resolver, config.remote.request_delay());
            acquirer
                .run(range, asset, &config.paths.raw_dir(asset))
                .context("download failed")?;
        }
        Command::Extract => {
            Extractor::new(
                config.paths.raw_dir(AssetClass::Equity),
                config.paths.extracted_dir(),
            )
            .run()
            .context("extraction failed")?;
        }
        Command::Merge { asset, year } => {
            YearlyAggregator::from_config(&config, asset)
                .run(year)
                .with_context(|| format!("yearly aggregation of {} {} failed", asset, year))?;
        }
        Command::Master { asset } => {
            MasterAggregator::from_config(&config, asset)
                .run()
                .with_context(|| format!("master aggregation of {} failed", asset))?;
        }
    }

    Ok(())
}
