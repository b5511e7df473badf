mod cli;
mod db;
mod decode;
mod diagnostics;
mod dialect;
mod error;
mod fmt;
mod grid;
mod header;
mod importer;
mod layout;
mod models;
mod refresh;
mod settings;
mod writer;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

/// Logs go to stderr so `--json` output stays clean. `RUST_LOG` wins over the
/// default level; `-v` forces debug.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let db = cli.db.as_deref();

    let result = match cli.command {
        Commands::Init { data_dir, store } => cli::init::run(data_dir, store, db),
        Commands::Import(args) => cli::import::run(&args, db),
        Commands::Preview {
            file,
            kind,
            toggles,
            json,
        } => cli::preview::run(&file, &kind, &toggles, json),
        Commands::Status => cli::status::run(db),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
