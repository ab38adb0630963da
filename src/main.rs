// src/main.rs - Command-line host for the backend core
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use orion_rs::{build_backend, load_config, Config, PrinterBackend, StatusProvider, Thumbnail, ThumbnailSize};

/// Talk to a NanoDLP or Odyssey backend through the canonical status model.
#[derive(Parser, Debug)]
#[command(name = "orion-host", about = "Resin printer backend client.")]
struct Cli {
    /// Path to a TOML config file; defaults are used when it does not exist
    #[arg(short, long, default_value = "orion.toml")]
    config: PathBuf,

    /// Maximum log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch one status and print it as canonical JSON
    Status,
    /// Run the poller and print every snapshot
    Watch {
        /// Poll at the continuous kinematic interval
        #[arg(long)]
        continuous: bool,
    },
    /// List files on the backend
    Files {
        #[arg(long, default_value = "local")]
        volume: String,
        #[arg(long, default_value = "")]
        path: String,
        #[arg(long, default_value_t = 0)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Download the thumbnail of a file
    Thumbnail {
        path: String,
        #[arg(long, default_value = "local")]
        volume: String,
        #[arg(long)]
        large: bool,
        #[arg(long)]
        out: PathBuf,
    },
    /// Home the Z axis
    Home,
    /// Emergency stop
    Stop,
}

fn config_from(path: &Path) -> Result<Config, Box<dyn std::error::Error + Send + Sync + 'static>> {
    if !path.exists() {
        tracing::info!("No config at '{}', using defaults", path.display());
        return Ok(Config::default());
    }
    tracing::info!("Loading configuration from: {}", path.display());
    let config = load_config(&path.to_string_lossy())?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .init();

    let config = config_from(&cli.config)?;
    let backend = build_backend(&config)?;
    let provider = StatusProvider::new(backend.clone(), config.polling.clone());

    match cli.command {
        Commands::Status => {
            let snapshot = provider.refresh(true).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot.status)?);
        }
        Commands::Watch { continuous } => {
            provider.set_continuous_kinematic_polling(continuous);
            let poller = provider.spawn();
            let mut updates = Box::pin(provider.updates());
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    next = updates.next() => {
                        let Some(snapshot) = next else { break };
                        if !snapshot.has_ever_connected {
                            continue;
                        }
                        let line = serde_json::json!({
                            "sequence": snapshot.sequence,
                            "connected": snapshot.connected,
                            "status": snapshot.status,
                            "kinematics": snapshot.kinematics,
                            "last_error": snapshot.last_error,
                        });
                        println!("{}", line);
                    }
                }
            }
            poller.shutdown().await;
        }
        Commands::Files { volume, path, limit, offset } => {
            let listing = backend.list_items(&volume, limit, offset, &path).await?;
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        Commands::Thumbnail { path, volume, large, out } => {
            let size = if large { ThumbnailSize::Large } else { ThumbnailSize::Small };
            match backend.get_file_thumbnail(&volume, &path, size).await? {
                Thumbnail::Image(bytes) => {
                    tokio::fs::write(&out, &bytes).await?;
                    tracing::info!("Wrote {} bytes to {}", bytes.len(), out.display());
                }
                Thumbnail::Placeholder => {
                    tracing::warn!("No thumbnail available for '{}'", path);
                }
            }
        }
        Commands::Home => {
            let ok = provider.home().await;
            println!("home: {}", if ok { "ok" } else { "failed" });
            if let Some(kinematics) = provider.snapshot().kinematics {
                println!("{}", serde_json::to_string(&kinematics)?);
            }
        }
        Commands::Stop => {
            let ok = provider.emergency_stop().await;
            println!("stop: {}", if ok { "ok" } else { "failed" });
        }
    }

    Ok(())
}
