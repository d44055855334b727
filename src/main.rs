mod checkpoint;
mod cli;
mod commands;
mod config;
mod llm;
mod model;
mod process;
mod questions;
mod store;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::util::env_flag;

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Pages(args) => commands::pages::run(args),
        Commands::CheckPages(args) => commands::check_pages::run(args),
        Commands::Questions(args) => commands::questions::run(args),
        Commands::Lessons(args) => commands::lessons::run(args),
        Commands::Status(args) => commands::status::run(args),
        Commands::Doctor(args) => commands::doctor::run(args),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if env_flag("LOG_JSON") {
        builder.json().init();
    } else {
        builder.init();
    }
}
