use clap::{Parser, Subcommand};

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "scrollguard-cli", version, about = "ScrollGuard CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and edit site blocks
    Block {
        #[command(subcommand)]
        action: commands::block::BlockAction,
    },
    /// Daily news reading allowance
    News {
        #[command(subcommand)]
        action: commands::news::NewsAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Run a page session in the terminal
    Simulate(commands::simulate::SimulateArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let default_level = match cli.command {
        Commands::Simulate(_) => "info",
        _ => "warn",
    };
    logging::init(default_level);

    let result = match cli.command {
        Commands::Block { action } => commands::block::run(action).await,
        Commands::News { action } => commands::news::run(action).await,
        Commands::Config { action } => commands::config::run(action),
        Commands::Simulate(args) => commands::simulate::run(args).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
