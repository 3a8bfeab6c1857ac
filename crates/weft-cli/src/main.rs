//! weft CLI
//!
//! Validate configurations and run transaction scripts against the
//! configured backends

use clap::{Parser, Subcommand};

mod commands;

#[derive(Debug, Parser)]
#[command(name = "weft")]
#[command(about = "weft - one transaction across many storage backends", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate a configuration and print the model to repository table
    Check(commands::check::CheckArgs),
    /// Execute a script in a single transaction
    Run(commands::run::RunArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check(args) => commands::check::execute(args),
        Commands::Run(args) => commands::run::execute(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
