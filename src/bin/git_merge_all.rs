use clap::Parser;
use gpull::{cli, interrupt, logging};
use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    interrupt::install(|| {})?;
    let args = cli::MergeArgs::parse();
    logging::init(args.output.verbosity())?;
    let success = cli::run_merge(args)?;
    Ok(if success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
