use anyhow::Result;
use clap::Parser;

use smart_timer_lock::cli::{Args, Commands, PinCommands};
use smart_timer_lock::commands::{self, utils::init_logging};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose);

    match args.command {
        Commands::Init { output, force } => commands::init(output, force),
        Commands::Pin { command } => match command {
            PinCommands::Set => commands::pin_set(args.config),
            PinCommands::Check => commands::pin_check(args.config),
        },
        Commands::Start(start) => commands::start(args.config, start).await,
    }
}
