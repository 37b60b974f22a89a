//! sdalocal: interactive shell over the sdaLocal state store.
//!
//! Reads one command per line from stdin. Every change is saved in the
//! background; `quit` or end of input saves once more and exits.

mod commands;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use sdalocal_core::paths;
use sdalocal_core::{AppContext, LoadOutcome};

use commands::Flow;

#[derive(Parser)]
#[command(name = "sdalocal")]
#[command(about = "Church bulletin, finances, media log and building projects, stored locally")]
struct Cli {
    /// Data file (default: <platform data dir>/sdaLocal/sdalocal_data.json)
    #[arg(long, env = "SDALOCAL_DATA_FILE")]
    data_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let data_file = match paths::resolve_data_file(cli.data_file) {
        Ok(path) => path,
        Err(e) => {
            log::error!("Cannot locate the data file: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut context = match AppContext::builder().data_file(&data_file).build() {
        Ok(context) => context,
        Err(e) => {
            log::error!("Failed to open {}: {e}", data_file.display());
            return ExitCode::FAILURE;
        }
    };

    if let Some(LoadOutcome::Recovered { .. }) = context.load_outcome() {
        println!(
            "Could not read {}. Starting with a fresh set of records; \
             the old file will be kept alongside the new one.",
            data_file.display()
        );
    }

    run(&mut context);

    match context.shutdown() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Your latest changes could not be saved: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(context: &mut AppContext) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to read input: {e}");
                break;
            }
        };

        let result = commands::parse(&line).and_then(|command| match command {
            Some(command) => commands::execute(command, context, &mut stdout),
            None => Ok(Flow::Continue),
        });

        match result {
            Ok(Flow::Quit) => break,
            Ok(Flow::Continue) => {}
            Err(e) => eprintln!("{e}"),
        }
        let _ = stdout.flush();
    }
}
