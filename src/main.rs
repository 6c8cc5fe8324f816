use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use toolgate::cli::{Cli, Command};
use toolgate::config::Config;
use toolgate::engine::GateEngine;
use toolgate::state::SessionKey;
use toolgate::{Result, hooks};

#[tokio::main]
async fn main() {
    // Verdicts own stdout; all diagnostics go to stderr.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("toolgate: failed to initialize logging: {e}");
    }

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        // Engine faults only; a policy deny exits 0 through the JSON channel.
        eprintln!("toolgate: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load_or_default()?;
    match cli.command {
        Command::Hook => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .map_err(anyhow::Error::from)?;
            let response = hooks::handle(&config, &raw)?;
            println!(
                "{}",
                serde_json::to_string(&response).map_err(anyhow::Error::from)?
            );
        }
        Command::State { session } => {
            let engine = GateEngine::new(&config)?;
            let key = SessionKey::derive(&session);
            let state = engine.inspect(&key)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&state).map_err(anyhow::Error::from)?
            );
        }
    }
    Ok(())
}
