//! awardsync CLI: pull federal contract awards into a star schema.
//!
//! Pages through the spending-by-award search API, normalizes each award
//! into a fact row plus recipient / agency / sub-agency dimensions, and
//! writes the tables to CSV files or a push dataset.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
