use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{
        header::{ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, CONTENT_TYPE},
        HeaderName, HeaderValue, Method,
    },
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use anyhow::Context;
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::{Any, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::{debug, info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;

mod classifier;
mod config;
mod error;
mod models;
mod notifier;


use classifier::Classifier;
use config::Config;
use error::AppError;
use models::{AlertMessage, CaptionEvent, CaptionInput, StatusResponse};
use notifier::{Delivery, Notifier};

const API_KEY_HEADER: &str = "x-api-key";

/// Caption webhook receiver
/// Appends every caption to the log, alerts on attendance hints and codes
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    classifier: Arc<Classifier>,
    notifier: Arc<dyn Notifier>,
}

impl AppState {
    fn new(config: Config, notifier: Arc<dyn Notifier>) -> Self {
        let classifier = Classifier::new(&config.keywords);

        Self {
            config: Arc::new(config),
            classifier: Arc::new(classifier),
            notifier,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("Environment misconfigured")?;
    let notifier = notifier::from_config(&config).context("Failed to build notifier")?;
    info!("Alerting through {}", notifier.name());

    let state = AppState::new(config, notifier);
    info!("Watching for {} keywords", state.classifier.keywords().len());
    let addr = SocketAddr::new(state.config.host, state.config.port);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("🚀 Server running on http://{}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down");
    Ok(())
}

fn app(state: AppState) -> Router {
    let caption = Router::new()
        .route("/caption", post(handle_caption))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(caption)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::if_not_present(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, x-api-key"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            ACCESS_CONTROL_ALLOW_METHODS,
            allowed_methods(&state.config),
        ))
        .layer(cors_layer(&state.config))
        .with_state(state)
}

/// Sent on every non-preflight response too, not only on preflights
fn allowed_methods(config: &Config) -> HeaderValue {
    if config.transport.is_clipboard() {
        HeaderValue::from_static("POST, OPTIONS, GET")
    } else {
        HeaderValue::from_static("POST, OPTIONS")
    }
}

/// Any origin; OPTIONS preflights are answered here and never reach a handler
fn cors_layer(config: &Config) -> CorsLayer {
    let mut methods = vec![Method::POST, Method::OPTIONS];
    if config.transport.is_clipboard() {
        methods.push(Method::GET);
    }

    CorsLayer::new()
        .allow_origin(Any)
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(API_KEY_HEADER)])
        .allow_methods(methods)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if state.config.require_api_key {
        let provided = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());

        if provided.is_none() || provided != state.config.api_key.as_deref() {
            warn!("Rejected caption with missing or wrong API key");
            return Err(AppError::Unauthorized);
        }
    }

    Ok(next.run(request).await)
}

/// Receive a caption
/// Log first, then classify and alert; alert failures never fail the request
async fn handle_caption(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<StatusResponse>, AppError> {
    let input = CaptionInput::from_body(&body);
    let event = CaptionEvent::new(&input.text).ok_or(AppError::EmptyCaption)?;

    let span = info_span!("caption", id = %event.id);
    process_caption(&state, &event, &input).instrument(span).await?;

    Ok(Json(StatusResponse::ok()))
}

async fn process_caption(
    state: &AppState,
    event: &CaptionEvent,
    input: &CaptionInput,
) -> Result<(), AppError> {
    if input.ts.is_some() || input.url.is_some() {
        debug!(ts = ?input.ts, url = ?input.url, "Caption metadata");
    }

    let log_line = event.log_line();
    info!("{log_line}");
    append_to_log(&state.config.log_path, &log_line)?;

    let detection = state.classifier.classify(&event.text);

    if let Some(keyword) = &detection.matched_keyword {
        dispatch(state.notifier.as_ref(), AlertMessage::keyword(keyword, &event.text)).await;
    }

    if let Some(code) = &detection.matched_code {
        if state.config.log_codes {
            let code_line = event.code_line(code);
            info!("{code_line}");
            append_to_log(&state.config.log_path, &code_line)?;
        }
        dispatch(state.notifier.as_ref(), AlertMessage::code(code)).await;
    }

    Ok(())
}

async fn dispatch(notifier: &dyn Notifier, alert: AlertMessage) {
    match notifier.notify(&alert).await {
        Delivery::Sent => info!(transport = notifier.name(), kind = ?alert.kind, "📲 Alert sent"),
        Delivery::Skipped => {
            debug!(transport = notifier.name(), kind = ?alert.kind, "Alert skipped")
        }
        Delivery::Failed(e) => {
            warn!(transport = notifier.name(), kind = ?alert.kind, "❌ Alert failed: {e}")
        }
    }
}

// Helper functions

/// Opens, appends one line, closes. Never reads or truncates.
fn append_to_log(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    writeln!(file, "{line}")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install signal handler: {e}");
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
}
