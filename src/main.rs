//! Demo service.
//!
//! Serves a small orders API with tracing and metrics installed through the
//! platform plugin. `/orders/{id}/audit` calls back into the service with the
//! traced client, so its span has a child span from the outbound call.

use axum::{
    extract::{Path, State},
    routing::get,
    Json,
};
use clap::Parser;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use octopus::config::{from_env, load_config};
use octopus::instrument::{Instance, OperationError, OperationResult};
use octopus::observability::logging::init_logging;
use octopus::tracer::LogReporter;
use octopus::{App, Instrumentable, Operations, PlatformPlugin, Telemetry, TracedClient};

#[derive(Parser)]
#[command(name = "octopus-demo")]
#[command(about = "Instrumented demo service", long_about = None)]
struct Cli {
    /// TOML configuration file; environment variables only when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Log finished spans instead of sending them to the agent
    #[arg(long)]
    log_spans: bool,
}

/// In-memory order book whose operations are traced.
#[derive(Default)]
struct OrderBook {
    orders: Mutex<Vec<String>>,
}

impl OrderBook {
    fn list(&self) -> OperationResult {
        let orders = self
            .orders
            .lock()
            .map_err(|e| OperationError::Failed(e.to_string()))?;
        Ok(json!({"success": true, "http_code": 200, "orders": *orders}))
    }

    fn place(&self, item: Value) -> OperationResult {
        let item = item
            .as_str()
            .ok_or_else(|| OperationError::InvalidArguments {
                operation: "place".into(),
                message: "expected a string".into(),
            })?
            .to_string();
        let mut orders = self
            .orders
            .lock()
            .map_err(|e| OperationError::Failed(e.to_string()))?;
        orders.push(item);
        Ok(json!({"success": true, "http_code": 201, "id": orders.len()}))
    }
}

impl Instrumentable for OrderBook {
    fn operations() -> Operations<Self> {
        Operations::new()
            .with("list", |book: &OrderBook, _| book.list())
            .with("place", |book: &OrderBook, args| book.place(args))
    }
}

#[derive(Clone)]
struct DemoState {
    book: Arc<Instance<OrderBook>>,
    client: TracedClient,
    base_url: String,
}

async fn list_orders(State(state): State<DemoState>) -> Json<Value> {
    Json(respond(state.book.invoke("list", Value::Null)))
}

async fn place_order(State(state): State<DemoState>, Json(item): Json<Value>) -> Json<Value> {
    Json(respond(state.book.invoke("place", item)))
}

async fn audit_order(State(state): State<DemoState>, Path(id): Path<u64>) -> Json<Value> {
    let url = format!("{}/orders", state.base_url);
    match state.client.get(&url).send().await {
        Ok(response) => Json(json!({
            "success": response.status().is_success(),
            "http_code": response.status().as_u16(),
            "order": id,
        })),
        Err(e) => Json(json!({"success": false, "http_code": 502, "message": e.to_string()})),
    }
}

fn respond(result: OperationResult) -> Value {
    result.unwrap_or_else(|e| json!({"success": false, "http_code": 400, "message": e.to_string()}))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => from_env()?,
    };
    init_logging(&config.logging)?;

    tracing::info!(
        service = %config.service_name,
        tracing_enabled = config.tracing.enabled,
        metrics_enabled = config.metrics.enabled,
        "Configuration loaded"
    );

    let telemetry = if cli.log_spans {
        Telemetry::with_reporter(config, Arc::new(LogReporter))
    } else {
        Telemetry::new(config)
    };
    telemetry.warm_up().await;
    let book = telemetry.instrument(OrderBook::default(), &[])?;

    let state = DemoState {
        book: Arc::new(book),
        client: TracedClient::new(telemetry.clone()),
        base_url: format!("http://{}", cli.bind),
    };

    let mut app = App::new(telemetry.clone());
    app.route(
        "/orders",
        get(list_orders).post(place_order).with_state(state.clone()),
    );
    app.route("/orders/{id}/audit", get(audit_order).with_state(state));
    app.install(PlatformPlugin)?;

    let listener = TcpListener::bind(cli.bind).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let router = app.into_router().layer(TraceLayer::new_for_http());
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    telemetry.shutdown();
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
