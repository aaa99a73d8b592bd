//! loadchain CLI — run scripted requests through a chain and parallel loader.
//!
//! Useful for checking a configuration file and for watching the loader's
//! fan-out/fan-in and error policy at work.

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
