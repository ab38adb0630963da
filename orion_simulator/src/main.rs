// orion_simulator/src/main.rs - Serve the simulated NanoDLP backend
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "orion-simulator", about = "Simulated NanoDLP backend for local development.")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();
    let app = orion_simulator::app();

    let listener = tokio::net::TcpListener::bind((cli.host.as_str(), cli.port)).await?;
    tracing::info!("Simulated NanoDLP listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
