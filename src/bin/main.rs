use clap::error::ErrorKind;
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use pidward::{
    cli::{Cli, parse_args},
    config::ConfigStore,
    error::SupervisorError,
    supervisor::{Report, Supervisor},
};

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };
    init_logging(&args);

    match run(&args) {
        Ok(report) => {
            print_report(&report, args.json);
            exit_code(report.exit_code)
        }
        Err(err) => {
            if let Some(status) = err.status() {
                println!("{status}");
            }
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(args: &Cli) -> Result<Report, SupervisorError> {
    let store = ConfigStore::new(&args.config).temporary(args.temporary);
    debug!("Using config {}", store.path().display());

    let supervisor = Supervisor::from_store(store).with_options(args.options());
    supervisor.run(&args.request())
}

fn print_report(report: &Report, json: bool) {
    if !json {
        println!("{report}");
        return;
    }

    match serde_json::to_string_pretty(report) {
        Ok(rendered) => println!("{rendered}"),
        Err(err) => {
            error!("Failed to render report as JSON: {err}");
            println!("{report}");
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code)
        .map(ExitCode::from)
        .unwrap_or(ExitCode::FAILURE)
}
