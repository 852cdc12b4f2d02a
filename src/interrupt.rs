//! Ctrl-C handling shared by all binaries.

use crate::constants::STOPPED_BY_USER;
use crate::output;
use std::io::Write;

/// Exit status after an operator interrupt.
pub const INTERRUPTED_EXIT_CODE: i32 = 0;

/// Writes the interrupt notice to `writer` and returns the exit status.
pub fn report_interrupt(writer: &mut dyn Write) -> i32 {
    let _ = writeln!(writer, "{}", output::indented(0, STOPPED_BY_USER));
    let _ = writer.flush();
    INTERRUPTED_EXIT_CODE
}

/// Runs `cleanup`, then reports the interrupt. `cleanup` stands in for the
/// destructors that `process::exit` skips.
pub fn handle_interrupt(cleanup: fn(), writer: &mut dyn Write) -> i32 {
    cleanup();
    report_interrupt(writer)
}

/// Installs a handler that cleans up, reports the interrupt and exits the
/// process.
pub fn install(cleanup: fn()) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        let code = handle_interrupt(cleanup, &mut std::io::stdout());
        std::process::exit(code);
    })
    .map_err(|e| anyhow::anyhow!("Failed to install Ctrl-C handler: {}", e))
}
