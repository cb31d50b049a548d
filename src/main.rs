mod cli;
mod commands;
mod labels;
mod model;
mod nlp;
mod store;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{ChapterCommands, Cli, Commands};

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
        Commands::Init(args) => commands::init::run(args),
        Commands::Chapter(chapter) => match chapter.command {
            ChapterCommands::Add(args) => commands::chapter::add(args),
            ChapterCommands::Update(args) => commands::chapter::update(args),
        },
        Commands::Extract(args) => commands::extract::run(args),
        Commands::Entities(args) => commands::listing::entities(args),
        Commands::Mentions(args) => commands::listing::mentions(args),
        Commands::Status(args) => commands::status::run(args),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
