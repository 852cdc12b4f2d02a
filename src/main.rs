use gpull::{cli, interrupt, logging, remote};
use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    interrupt::install(remote::close_live_masters)?;
    let args = cli::RemoteArgs::parse_with_aliases();
    logging::init(args.pull.output.verbosity())?;
    let success = cli::run_remote(args)?;
    Ok(if success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
