use clap::Parser;
use audio_experiments::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate(args) => cli::validate::run(args).await,
        Command::Simulate(args) => cli::simulate::run(args).await,
    }
}
