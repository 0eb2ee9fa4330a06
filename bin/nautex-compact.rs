use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::Parser;
use nautex::{CompactOptions, CompactionLevel, Compactor};
use tracing::error;

#[derive(Parser)]
#[command(name = "nautex-compact")]
#[command(version = nautex::VERSION)]
#[command(about = "Compact a database, or merge and compact several", long_about = None)]
struct Args {
    /// Set the blocksize in bytes (e.g. 4096) or K (e.g. 4K); must be a
    /// power of 2 between 2K and 64K
    #[arg(short = 'b', long = "blocksize", default_value = "8K", value_parser = parse_block_size)]
    blocksize: u32,

    /// Disable full compaction
    #[arg(short = 'n', long = "no-full")]
    no_full: bool,

    /// Enable fuller compaction (not recommended if you plan to update
    /// the compacted database)
    #[arg(short = 'F', long = "fuller", conflicts_with = "no_full")]
    fuller: bool,

    /// If merging more than 3 databases, merge the postlists in multiple
    /// passes
    #[arg(short = 'm', long = "multipass")]
    multipass: bool,

    /// Preserve the numbering of document ids (requires sources with
    /// disjoint ranges of used document ids)
    #[arg(long = "no-renumber")]
    no_renumber: bool,

    /// Source databases followed by the destination
    #[arg(required = true, num_args = 2.., value_name = "SOURCE_DATABASE... DESTINATION_DATABASE")]
    paths: Vec<PathBuf>,
}

fn parse_block_size(arg: &str) -> Result<u32, String> {
    let (digits, multiplier) = match arg.strip_suffix(['K', 'k']) {
        Some(digits) => (digits, 1024u32),
        None => (arg, 1),
    };
    let value: u32 = digits
        .parse()
        .map_err(|_| bad_block_size(arg))
        .and_then(|v: u32| v.checked_mul(multiplier).ok_or_else(|| bad_block_size(arg)))?;
    if !(2048..=65536).contains(&value) || !value.is_power_of_two() {
        return Err(bad_block_size(arg));
    }
    Ok(value)
}

fn bad_block_size(arg: &str) -> String {
    format!(
        "Bad value '{}' passed for blocksize, must be a power of 2 between 2K and 64K",
        arg
    )
}

fn run(args: Args) -> Result<()> {
    let (sources, dest) = args
        .paths
        .split_at_checked(args.paths.len() - 1)
        .ok_or_else(|| anyhow!("need at least one source and a destination"))?;
    let dest = &dest[0];

    let level = if args.fuller {
        CompactionLevel::Fuller
    } else if args.no_full {
        CompactionLevel::Standard
    } else {
        CompactionLevel::Full
    };
    let options = CompactOptions {
        block_size: args.blocksize,
        level,
        multipass: args.multipass,
        renumber: !args.no_renumber,
    };
    Compactor::new(options).compact(sources, dest)?;
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Argument errors exit 1 like every other failure (clap's default
    // would be 2); --help and --version still exit 0.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if e.use_stderr() => {
            eprintln!("{}", e);
            return ExitCode::from(1);
        }
        Err(e) => {
            print!("{}", e);
            return ExitCode::SUCCESS;
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("nautex-compact: {:#}", e);
            ExitCode::from(1)
        }
    }
}
