use anyhow::Result;
use axum::Router;
use clap::Parser;
use server::build_app;
use simcore::Config;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Descriptor store directory
    #[arg(long, default_value = "./features")]
    store: String,
    /// Corpus root the store was built from
    #[arg(long, default_value = "./data")]
    corpus: String,
    /// Optional TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    let app: Router = build_app(args.store.clone(), args.corpus.clone(), config)?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, store = %args.store, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
