use clap::Parser;
use gpull::{cli, interrupt, logging};
use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    interrupt::install(|| {})?;
    let args = cli::LocalArgs::parse();
    logging::init(args.pull.output.verbosity())?;
    let success = cli::run_local(args)?;
    Ok(if success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
