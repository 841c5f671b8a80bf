use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use thumbd::config::{self, ServerConfig};
use thumbd::director::QueryDirector;
use thumbd::imaging::RustBackend;
use thumbd::pool::Pool;
use thumbd::proxy::Proxy;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Release builds report the crate version; anything else reports the
/// commit it was built from.
fn version_string() -> &'static str {
    if env!("ON_RELEASE_TAG") == "true" {
        return env!("CARGO_PKG_VERSION");
    }
    match env!("GIT_HASH") {
        "" => "dev@unknown",
        // Called once, from clap's derive.
        hash => Box::leak(format!("dev@{hash}").into_boxed_str()),
    }
}

#[derive(Parser)]
#[command(name = "thumbd")]
#[command(about = "Thumbnailing image proxy")]
#[command(long_about = "\
Thumbnailing image proxy

Fetches originals from an origin server, resizes or crops them, and serves
the result:

  GET /cats/tabby.jpg?w=200&h=300            fit inside 200x300
  GET /cats/tabby.jpg?w=300&h=400&crop=true  exactly 300x400
  GET /cats/tabby.jpg?format=webp&q=80       convert

Statuses: 404 origin has no such file, 415 not an image (or smaller than
2x2), 413 too large to decode safely, 503 all workers busy.

Run 'thumbd gen-config' to generate a documented thumbd.toml.")]
#[command(version = version_string())]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the proxy server
    Serve(ServeArgs),
    /// Print a stock thumbd.toml with all options documented
    GenConfig,
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Config file (defaults are used when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overriding server.listen
    #[arg(long)]
    listen: Option<String>,

    /// Origin base URL, overriding origin.base_url
    #[arg(long)]
    origin: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => {
            init_tracing();
            let config = resolve_serve_config(&args)?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(serve(config))?;
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("thumbd=info")),
        )
        .init();
}

/// Load the config file, then apply command-line overrides and re-validate.
fn resolve_serve_config(args: &ServeArgs) -> Result<ServerConfig, config::ConfigError> {
    let mut config = config::load_config(args.config.as_deref())?;
    if let Some(listen) = &args.listen {
        config.server.listen = listen.clone();
    }
    if let Some(origin) = &args.origin {
        config.origin.base_url = origin.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn serve(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let workers = config.pool.workers();
    let pool = Pool::new(workers, config.pool.max_queue())?
        .with_max_processing_duration(config.pool.max_processing());

    let client = reqwest::Client::builder()
        .timeout(config.origin.fetch_timeout())
        .pool_max_idle_per_host(config.origin.max_idle_connections)
        .build()?;

    let director = QueryDirector::new(config.origin_url()?, config.default_options());
    let proxy = Arc::new(Proxy::new(director, pool, RustBackend::new(), client));

    let addr = config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        %addr,
        origin = %config.origin.base_url,
        workers,
        "Listening"
    );

    axum::serve(listener, Arc::clone(&proxy).router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    proxy.close().await;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down"),
        // Without a signal handler, run until killed.
        Err(_) => std::future::pending::<()>().await,
    }
}
