//! Suggestor Service
//!
//! Runs the suggestion engine with its background prefetch and cleanup
//! loops, a liveness endpoint and a Prometheus endpoint. With `--query` it
//! answers one request, prints the merged list as JSON and exits.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use suggestor::error::{Error, Result};
use suggestor::{EngineConfig, SuggestionEngine};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Suggestor - multi-provider suggestion engine with tiered caching
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML, or JSON with a .json extension)
    #[arg(long, env = "SUGGESTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Answer one query and exit
    #[arg(long)]
    query: Option<String>,

    /// Source language for --query
    #[arg(long, default_value = "en")]
    source: String,

    /// Target language for --query
    #[arg(long, default_value = "fr")]
    target: String,

    /// Result limit for --query (defaults to the configured limit)
    #[arg(long, allow_negative_numbers = true)]
    max_results: Option<i64>,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => {
            info!("No configuration file given, using defaults");
            EngineConfig::default()
        }
    };

    let engine = Arc::new(SuggestionEngine::from_config(config).await?);

    if let Some(query) = &args.query {
        let max_results = args
            .max_results
            .unwrap_or(engine.config().aggregator.default_max_results as i64);
        let suggestions = engine
            .suggest(query, &args.source, &args.target, max_results)
            .await?;
        println!("{}", serde_json::to_string_pretty(&suggestions)?);
        return Ok(());
    }

    info!("Starting Suggestor {}", suggestor::VERSION);
    info!("  Providers: {:?}", engine.aggregator().provider_ids());
    info!("  Prefetch enabled: {}", engine.config().prefetch.enabled);

    engine.start_background();

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_engine = engine.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_engine).await {
            error!("Metrics server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    engine.shutdown().await;
    info!("Suggestor shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// HTTP Servers
// =============================================================================

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

async fn bind(addr: &str, name: &str) -> Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid {} server address: {}", name, e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind {} server: {}", name, e)))?;

    info!("{} server listening on {}", name, addr);
    Ok(listener)
}

async fn run_health_server(addr: &str) -> Result<()> {
    async fn health_handler(req: Request<Incoming>) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
        let response = match req.uri().path() {
            "/healthz" | "/livez" | "/readyz" => respond(StatusCode::OK, "text/plain", "ok"),
            _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
        };
        Ok(response)
    }

    let listener = bind(addr, "Health").await?;

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Health server accept error: {}", e)))?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(health_handler))
                .await
            {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

async fn run_metrics_server(addr: &str, engine: Arc<SuggestionEngine>) -> Result<()> {
    let listener = bind(addr, "Metrics").await?;

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?;

        let io = TokioIo::new(stream);
        let engine = engine.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let engine = engine.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match engine.render_metrics() {
                            Ok(text) => respond(StatusCode::OK, prometheus::TEXT_FORMAT, text),
                            Err(e) => {
                                error!("Failed to render metrics: {}", e);
                                respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "metrics unavailable")
                            }
                        },
                        "/stats" => match serde_json::to_vec(&engine.tier_stats()) {
                            Ok(body) => respond(StatusCode::OK, "application/json", body),
                            Err(_) => respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "stats unavailable"),
                        },
                        _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
