//! lineage CLI: recursive knowledge distillation over citation graphs.
//!
//! Distills a seed paper into a validated knowledge record, follows its
//! foundational citations breadth-first, and writes linked Markdown notes.

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
