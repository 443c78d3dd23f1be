//! h1-wire server binary.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::Listener ──▶ http::server ──▶ http::connection ──▶ routing::Router
//!                (permits)         (one task per     (parse, body,         ├─ echo
//!                                   connection)       respond, upgrade)    ├─ websocket echo
//!                                                                          └─ static files
//!
//!     lifecycle (signals → Shutdown)   observability (tracing, metrics)   config (TOML)
//! ```

use std::path::PathBuf;

use clap::Parser;

use h1_wire::config::{load_config, validate_config, RouteConfig, RouteKind, ServerConfig};
use h1_wire::lifecycle::{wait_for_signal, Shutdown};
use h1_wire::net::Listener;
use h1_wire::observability::{logging, metrics};
use h1_wire::{HttpServer, Router};

#[derive(Parser, Debug)]
#[command(name = "h1-wire", version, about = "HTTP/1.1 server with WebSocket upgrade")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Serve files from this directory when no routes are configured.
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Override `observability.log_level`.
    #[arg(long)]
    log_level: Option<String>,
}

/// Routes used when the configuration defines none.
fn default_routes(root: Option<&PathBuf>) -> Vec<RouteConfig> {
    let mut routes = vec![RouteConfig {
        name: "websocket-echo".into(),
        host: None,
        path_prefix: Some("/ws".into()),
        kind: RouteKind::WebsocketEcho,
        root: None,
    }];
    routes.push(match root {
        Some(root) => RouteConfig {
            name: "files".into(),
            host: None,
            path_prefix: None,
            kind: RouteKind::Static,
            root: Some(root.display().to_string()),
        },
        None => RouteConfig {
            name: "echo".into(),
            host: None,
            path_prefix: None,
            kind: RouteKind::Echo,
            root: None,
        },
    });
    routes
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    if config.routes.is_empty() {
        config.routes = default_routes(cli.root.as_ref());
    }
    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            eprintln!("invalid configuration: {error}");
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "h1-wire starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        routes = config.routes.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let router = Router::from_config(&config.routes)?;
    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            shutdown.trigger();
        }
    });

    HttpServer::new(config, router).run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
