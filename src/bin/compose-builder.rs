use std::process::ExitCode;

use clap::Parser;
use compose_builder::exit_code_for;
use compose_builder::logging::init_logging;
use compose_builder::worker::CancelToken;
use tracing::{error, warn};

mod workflows;

use workflows::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_logging(&cli.log_level, cli.log_json) {
        eprintln!("error: {err:#}");
        return ExitCode::from(1);
    }

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        warn!("interrupt received; terminating in-flight workers");
        on_interrupt.cancel();
    }) {
        error!("failed to set Ctrl-C handler: {}", err);
    }

    match workflows::run_command(&cli, cancel) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code_for(&err);
            error!(exit_code = code, "{:#}", err);
            ExitCode::from(code)
        }
    }
}
