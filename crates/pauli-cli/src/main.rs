//! # pauli
//!
//! Runs a project's build, test and lint scripts inside a reproducible build
//! container described by `.pauli/config.yaml`.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

mod commands;
mod logging;
mod output;
mod project;

use clap::Parser;

use crate::commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log, cli.json)?;

    let status = commands::execute(cli).await?;
    if status != 0 {
        std::process::exit(status);
    }
    Ok(())
}
