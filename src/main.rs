mod browser;
mod chunk;
mod config;
mod conversation;
mod fetch;
mod governor;
mod providers;
mod salvage;

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::SessionConfig;

fn main() -> anyhow::Result<()> {
    // Optional .env for OPENAI_API_KEY and friends.
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let mut config_path = PathBuf::from("config.yaml");

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" | "-V" => {
                println!("harvester {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                println!("harvester {}", env!("CARGO_PKG_VERSION"));
                println!("{}\n", env!("CARGO_PKG_DESCRIPTION"));
                println!("Usage: harvester [CONFIG]\n");
                println!("Arguments:");
                println!("  CONFIG           Path to the session config (default: ./config.yaml)");
                println!("\nOptions:");
                println!("  -h, --help       Print help");
                println!("  -V, --version    Print version");
                return Ok(());
            }
            other => config_path = PathBuf::from(other),
        }
    }

    let config = SessionConfig::load(&config_path)?;
    let settings = config.settings.build();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if settings.verbose {
                EnvFilter::new("info,chromiumoxide=off")
            } else {
                EnvFilter::new("warn,chromiumoxide=off")
            }
        }))
        .init();

    let (engine, llm_options) = config.llm_config.build()?;

    let fetch_section = match config.fetch {
        Some(section) => section,
        None => {
            tracing::info!("no fetch section configured, nothing to do");
            return Ok(());
        }
    };
    let fetch_options = fetch_section.build()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async move {
            let source = Arc::new(fetch::ChromePageSource {
                headless: fetch_options.headless,
            });

            fetch::collect(Arc::new(engine), source, llm_options, fetch_options, &settings)
                .await?;

            Ok(())
        })
}
