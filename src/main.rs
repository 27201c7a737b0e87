use anyhow::Context;
use clap::Parser;
use crtokenz::{AppState, Settings};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// Trusted profile demo service
#[derive(Parser)]
#[command(name = "crtokenz")]
#[command(version, about)]
struct Cli {
    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log verbosity level (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("crtokenz={default_level},tower_http=info")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // A .env file is optional; it only fills in variables that aren't already set.
    let dotenv = dotenvy::dotenv();
    init_tracing(cli.verbose);
    if let Ok(path) = dotenv {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    let mut settings = Settings::load().context("Loading configuration from the environment")?;
    if let Some(port) = cli.port {
        settings.port = port;
    }
    if cli.print_config {
        println!("{:#?}", settings);
        return Ok(());
    }
    if settings.echo_tokens {
        tracing::warn!("ECHO_TOKENS is set: responses will contain live credentials");
    }

    let port = settings.port;
    let state = Arc::new(AppState::new(settings).context("Building HTTP client")?);
    let app = crtokenz::router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Binding to port {}", port))?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Serving HTTP")?;
    Ok(())
}
