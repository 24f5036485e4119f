//! OCR Pipeline - multi-engine OCR with result combination and AI correction.

mod combiner;
mod config;
mod corrector;
mod diff;
mod error;
mod ocr;
mod openrouter;
mod pipeline;
mod runner;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use combiner::CombinationMethod;
use config::ServiceConfig;
use corrector::{CorrectedResult, CorrectionBackend, CorrectionOutcome, Corrector, SuggestionOutcome, SuggestionResult};
use error::{ConfigurationError, CorrectionError};
use ocr::{Document, DocumentKind, EngineRegistry, SUPPORTED_FORMATS};
use openrouter::OpenRouterClient;
use pipeline::{Pipeline, PipelineDefaults, PipelineRequest, PipelineResponse};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(json!({ "success": false, "error": message.into() })),
    )
}

impl From<ConfigurationError> for (StatusCode, Json<Value>) {
    fn from(e: ConfigurationError) -> Self {
        api_error(StatusCode::BAD_REQUEST, e.to_string())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "ocr_pipeline=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env()?;
    let http = reqwest::Client::new();

    // Engines and correction backend are fixed for the lifetime of the process
    let registry = EngineRegistry::from_config(&config, http.clone()).await;
    info!("OCR engines available: {:?}", registry.available());

    let backend = OpenRouterClient::from_config(&config.correction, http)
        .map(|c| Arc::new(c) as Arc<dyn CorrectionBackend>);
    match &backend {
        Some(b) => info!("AI correction enabled (model: {})", b.model()),
        None => info!("AI correction not available - OPENROUTER_API_KEY not set"),
    }
    let corrector = Corrector::new(backend, config.correction.timeout);

    let pipeline = Pipeline::new(
        Arc::new(registry),
        corrector,
        PipelineDefaults {
            language: config.default_language.clone(),
            external_confidence: config.external_default_confidence,
        },
    );

    let app = router(AppState { pipeline }, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/engines", get(list_engines))
        .route("/process", post(process_file))
        .route("/correct-text", post(correct_text))
        .route("/suggest-improvements", post(suggest_improvements));

    Router::new()
        .nest("/api/ocr", api)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Liveness check.
async fn health() -> Json<Value> {
    Json(json!({ "success": true, "status": "healthy" }))
}

/// Engines callers may request and whether AI correction is configured.
async fn list_engines(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "engines": state.pipeline.available_engines(),
        "ai_correction_available": state.pipeline.corrector().is_available(),
        "supported_formats": SUPPORTED_FORMATS,
    }))
}

/// Upload a document and run the OCR pipeline on it.
async fn process_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<PipelineResponse>), ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut engines = Vec::new();
    let mut language = None;
    let mut ai_correction = true;
    let mut combination_method = CombinationMethod::default();
    let mut context = None;
    let mut external_engine = None;
    let mut confidence = None;
    let mut correction_timeout = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        api_error(StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let filename = field.file_name().unwrap_or_default().to_string();
            let data = field.bytes().await.map_err(|e| {
                api_error(StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
            })?;
            file = Some((filename, data.to_vec()));
            continue;
        }

        let value = field.text().await.map_err(|e| {
            api_error(StatusCode::BAD_REQUEST, format!("Failed to read field {}: {}", name, e))
        })?;
        match name.as_str() {
            "engines" => engines.extend(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(String::from),
            ),
            "language" => language = Some(value),
            "ai_correction" => ai_correction = value.trim().eq_ignore_ascii_case("true"),
            "combination_method" => combination_method = value.parse()?,
            "context" => context = Some(value),
            "external_engine" => external_engine = Some(value),
            "confidence" => {
                confidence = Some(value.trim().parse::<f64>().map_err(|_| {
                    api_error(StatusCode::BAD_REQUEST, format!("Invalid confidence: {}", value))
                })?)
            }
            "correction_timeout" => {
                let secs = value.trim().parse::<f64>().ok().filter(|s| *s > 0.0).ok_or_else(|| {
                    api_error(StatusCode::BAD_REQUEST, format!("Invalid correction_timeout: {}", value))
                })?;
                correction_timeout = Some(Duration::from_secs_f64(secs));
            }
            _ => {}
        }
    }

    let Some((filename, data)) = file else {
        return Err(api_error(StatusCode::BAD_REQUEST, "No file provided"));
    };
    if filename.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "No file selected"));
    }
    let kind = DocumentKind::from_filename(&filename)
        .ok_or_else(|| ConfigurationError::UnsupportedFileType(filename.clone()))?;

    info!("Received file: {} ({} bytes)", filename, data.len());

    let request = PipelineRequest {
        document: Document::new(filename, kind, data),
        engines,
        language,
        ai_correction,
        combination_method,
        context,
        external_engine,
        confidence,
        correction_timeout,
    };

    let response = state.pipeline.run(request).await.map_err(|e| {
        error!("Pipeline rejected request: {}", e);
        ApiError::from(e)
    })?;

    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(response)))
}

#[derive(serde::Deserialize)]
struct CorrectTextRequest {
    text: Option<String>,
    language: Option<String>,
    context: Option<String>,
}

/// Correct text the caller already has, bypassing OCR.
async fn correct_text(
    State(state): State<AppState>,
    Json(body): Json<CorrectTextRequest>,
) -> Result<Json<Value>, ApiError> {
    let text = body
        .text
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "No text provided"))?;
    let corrector = state.pipeline.corrector();
    if !corrector.is_available() {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            CorrectionError::Unavailable.to_string(),
        ));
    }

    let language = resolve_language(&state, body.language)?;
    let result: CorrectedResult = corrector
        .correct(&text, &language, body.context.as_deref(), None)
        .await;

    Ok(Json(json!({
        "success": matches!(result.outcome, CorrectionOutcome::Success { .. }),
        "result": result,
    })))
}

#[derive(serde::Deserialize)]
struct SuggestRequest {
    text: Option<String>,
    language: Option<String>,
}

/// Propose improvements without rewriting the text.
async fn suggest_improvements(
    State(state): State<AppState>,
    Json(body): Json<SuggestRequest>,
) -> Result<Json<Value>, ApiError> {
    let text = body
        .text
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "No text provided"))?;
    let corrector = state.pipeline.corrector();
    if !corrector.is_available() {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "AI suggestions not available - no correction backend configured",
        ));
    }

    let language = resolve_language(&state, body.language)?;
    let result: SuggestionResult = corrector.suggest(&text, &language, None).await;

    Ok(Json(json!({
        "success": matches!(result.outcome, SuggestionOutcome::Success { .. }),
        "result": result,
    })))
}

// ============================================================================
// Helper functions
// ============================================================================

fn resolve_language(state: &AppState, language: Option<String>) -> Result<String, ApiError> {
    let language = language
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| state.pipeline.default_language().to_string());
    pipeline::validate_language(&language)?;
    Ok(language)
}
