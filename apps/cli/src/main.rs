//! RepoTutor CLI: turn a code repository into a beginner tutorial.
//!
//! Crawls a GitHub repository or local directory, asks a text generation
//! service to explain its core abstractions, and assembles the answers into
//! an ordered, illustrated tutorial.

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
