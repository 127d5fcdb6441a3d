//! rod-daemon entry point.
//!
//! Thin: loads config and secrets, starts the dashboard session, wires
//! middleware and serves the local HTTP bridge. Route handlers live in
//! `routes.rs`; shared state in `state.rs`.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use rod_config::{report_unused_keys, ConfigConsumer, UnusedKeyPolicy};
use rod_daemon::{routes, state};
use rod_session::{HttpDashboardApi, Session, SessionSettings};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "rod-daemon", about = "Restaurant dashboard live-state bridge")]
struct Args {
    /// Overlay YAML files, applied in order on top of the built-in defaults.
    #[arg(long = "config")]
    config: Vec<String>,

    /// Overrides `daemon.bind_addr`.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Fail at startup when the API token env var is not set.
    #[arg(long)]
    require_token: bool,

    /// Treat unused config keys as an error instead of a warning.
    #[arg(long)]
    strict_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if missing.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();
    let args = Args::parse();

    let paths: Vec<&str> = args.config.iter().map(String::as_str).collect();
    let loaded = rod_config::load_layered_yaml(&paths).context("config load failed")?;
    let policy = if args.strict_config {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };
    let report = report_unused_keys(ConfigConsumer::Daemon, &loaded.config_json, policy)?;
    for key in &report.unused_leaf_pointers {
        warn!(key = %key, "unused config key");
    }
    let cfg = loaded.dashboard()?;
    let secrets = rod_config::secrets::resolve_secrets(&loaded.config_json, args.require_token)?;
    if secrets.api_token.is_none() {
        warn!(env = %secrets.api_token_env, "no api token set; requests go unauthenticated");
    }
    info!(config_hash = %loaded.config_hash, base_url = %cfg.api.base_url, "config loaded");

    let api = HttpDashboardApi::new(
        &cfg.api.base_url,
        secrets.api_token.clone(),
        cfg.request_timeout(),
    )?;
    let session = Session::start(
        Arc::new(api),
        SessionSettings::from_config(&cfg, secrets.api_token),
    );
    let shared = Arc::new(state::AppState::new(session.clone(), loaded.config_hash));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = match args.bind {
        Some(a) => a,
        None => cfg.daemon.socket_addr()?,
    };
    info!("rod-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    session.shutdown().await;
    info!("rod-daemon stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler failed; shutting down");
    }
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}
