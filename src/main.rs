use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use weldsync::manager::Manager;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    #[arg(long)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Synth,

    Process {
        /// Recompute everything, ignoring cached results.
        #[arg(long)]
        force: bool,

        /// Exit with an error if any channel, region or table failed.
        #[arg(long)]
        strict: bool,
    },

    Clean,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mgr = Manager::new(args.data_dir).context("failed to construct mgr")?;

    match args.command {
        Command::Synth => mgr.create_synthetic()?,
        Command::Process { force, strict } => {
            let summaries = mgr.process_all(force)?;
            for summary in &summaries {
                for failure in &summary.failures {
                    log::warn!("{}: {failure}", summary.folder);
                }
            }
            let n_failures: usize = summaries.iter().map(|s| s.failures.len()).sum();
            log::info!(
                "processed {} folders with {n_failures} failures",
                summaries.len()
            );
            if strict && n_failures > 0 {
                bail!("{n_failures} failures in strict mode");
            }
        }
        Command::Clean => mgr.clean_all()?,
    }

    Ok(())
}
