mod capture;
mod config;
mod context;
mod core;
mod daemon;
mod error;
mod generation;
mod memory;
mod orchestrator;
mod scheduler;
mod shell;
mod traits;
mod types;
pub mod utils;

#[cfg(test)]
mod integration_tests;
#[cfg(test)]
mod testing;

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Handle CLI arguments
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        match args[1].as_str() {
            "--version" | "-V" => {
                println!("companiond {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                println!("companiond {}", env!("CARGO_PKG_VERSION"));
                println!("{}\n", env!("CARGO_PKG_DESCRIPTION"));
                println!("Usage: companiond [OPTIONS]\n");
                println!("Runs the assistant core daemon: SQLite conversation memory,");
                println!("periodic screen capture, and a local HTTP endpoint for the shell.");
                println!("\nConfiguration: ./config.toml (defaults apply when absent);");
                println!("LLM_API_URL and LLM_MODEL override the generation endpoint.");
                println!("\nOptions:");
                println!("  -h, --help       Print help");
                println!("  -V, --version    Print version");
                return Ok(());
            }
            _ => {}
        }
    }

    let config_path = PathBuf::from("config.toml");
    let config = config::AppConfig::load(&config_path)?;

    // Run async
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(crate::core::run(config))
}
