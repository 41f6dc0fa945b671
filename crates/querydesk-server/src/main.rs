//! QueryDesk server
//!
//! Usage:
//! ```bash
//! # Create the schema on the default store and configured binds
//! querydesk-server --config querydesk.yaml init-db
//!
//! # Serve the API
//! querydesk-server --config querydesk.yaml
//! ```
//!
//! Run a query:
//! ```bash
//! curl http://localhost:8088/api/v1/sqllab/execute \
//!   -H "Content-Type: application/json" \
//!   -H "x-querydesk-user-id: 7" -H "x-querydesk-username: alice" \
//!   -d '{"query_id": 42, "database_id": 1, "limit": 1000}'
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use querydesk_server::{ServerConfig, build_router, build_state, init_databases};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{Level, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// QueryDesk - multi-tenant SQL Lab server
#[derive(Parser)]
#[command(name = "querydesk-server")]
#[command(about = "Multi-tenant SQL Lab execution server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (YAML or TOML)
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "QUERYDESK_CONFIG",
        global = true
    )]
    config: Option<String>,

    /// Port to listen on
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Dispatch queries to the work queue by default
    #[arg(long, global = true)]
    run_async: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (default if no command specified)
    Serve,
    /// Create the query and tenant tables on every configured store
    InitDb,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };

    // Environment overrides the file, CLI flags override both
    config.merge_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.run_async {
        config.sqllab.run_async = true;
    }

    init_tracing(&config)?;
    match &cli.config {
        Some(path) => info!("📁 Loaded configuration from: {}", path),
        None => info!("📁 Using default configuration"),
    }

    let state = build_state(&config)?;

    if matches!(cli.command, Some(Commands::InitDb)) {
        init_databases(&state.registry).await?;
        info!("✅ Database initialisation complete");
        return Ok(());
    }

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.host, config.port))?;
    let listener = TcpListener::bind(addr).await?;

    info!("✅ QueryDesk listening on http://{}", addr);
    info!("   - Execute:      POST http://{}/api/v1/sqllab/execute", addr);
    info!("   - Query status: GET  http://{}/api/v1/sqllab/query/{{id}}", addr);
    info!("   - Health check: GET  http://{}/health", addr);
    info!(
        "   Execution mode: {}",
        if config.sqllab.run_async {
            "asynchronous"
        } else {
            "synchronous"
        }
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Install the global subscriber with the configured level and sqlx query control
fn init_tracing(config: &ServerConfig) -> anyhow::Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::new(format!("{}", log_level));

    // sqlx logs every statement at debug; keep it quiet unless asked
    if !config.logging.log_sql_queries {
        match "sqlx=warn".parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => tracing::warn!("Failed to set sqlx log filter: {}", e),
        }
    }

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
