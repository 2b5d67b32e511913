use crate::cnae::{list_cnaes, CnaeEntry};
use crate::config::Config;
use crate::errors::AppError;
use crate::export::{default_stem, file_exporter, ExportFormat, Exporter};
use crate::models::{CompanyQuery, CompanyRecord};
use crate::pipeline::{Pipeline, PipelineStage, PipelineStats};
use crate::services::build_http_client;
use crate::sheets::GoogleSheetsExporter;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state injected into handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Prospecting pipeline, shared by all requests (and its token cache with it).
    pub pipeline: Arc<Pipeline>,
    /// Sheets exporter, present when a spreadsheet and credentials are configured.
    /// Shared so its access token is reused across requests.
    pub sheets: Option<GoogleSheetsExporter>,
    exports: AtomicU64,
}

impl AppState {
    /// Builds the state, loading Sheets credentials once if they are configured.
    ///
    /// # Returns
    ///
    /// * `Result<AppState, AppError>` - `Config` error if the credentials are unusable.
    pub fn new(config: Config, pipeline: Pipeline) -> Result<Self, AppError> {
        let sheets = if config.sheets_configured() {
            let client = build_http_client(config.request_timeout)?;
            Some(GoogleSheetsExporter::from_config(client, &config, false)?)
        } else {
            None
        };

        Ok(Self {
            config,
            pipeline: Arc::new(pipeline),
            sheets,
            exports: AtomicU64::new(0),
        })
    }

    /// File stem unique within this process, so concurrent searches never share a file.
    fn next_stem(&self, query: &CompanyQuery) -> String {
        let seq = self.exports.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}_{}", default_stem(query), seq)
    }
}

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/cnaes", get(list_catalog))
        .route("/api/v1/search", get(search))
        .route("/download/:filename", get(download))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// Health check endpoint.
///
/// # Returns
///
/// * `(StatusCode, Json<serde_json::Value>)` - HTTP 200 OK with health status JSON.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "cnae-prospector",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

#[derive(Debug, Deserialize)]
pub struct CatalogParams {
    pub setor: Option<String>,
}

/// GET /api/v1/cnaes
pub async fn list_catalog(Query(params): Query<CatalogParams>) -> Json<Vec<CnaeEntry>> {
    Json(list_cnaes(params.setor.as_deref()).into_iter().copied().collect())
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub cnae: String,
    pub uf: Option<String>,
    pub cidade: Option<String>,
    #[serde(default = "default_limit")]
    pub limite: usize,
    #[serde(default)]
    pub formato: ExportFormat,
    #[serde(default)]
    pub sheets: bool,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub total: usize,
    pub stage: PipelineStage,
    pub stats: PipelineStats,
    pub records: Vec<CompanyRecord>,
    pub arquivo: Option<String>,
    pub download_url: Option<String>,
    pub sheets_url: Option<String>,
    pub sheets_error: Option<String>,
    pub export_error: Option<String>,
}

/// GET /api/v1/search
///
/// Runs the pipeline for one query and exports the result.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `params` - CNAE, location, limit, file format and whether to send to Google Sheets.
///
/// # Returns
///
/// * `Result<Json<SearchResponse>, AppError>` - Records plus where they were exported.
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    tracing::info!("GET /api/v1/search - params: {:?}", params);

    let query = CompanyQuery::new(
        &params.cnae,
        params.uf.as_deref(),
        params.cidade.as_deref(),
        params.limite,
    )?;
    let mut run = state.pipeline.run(&query).await?;

    let mut response = SearchResponse {
        total: run.records.len(),
        stage: run.stage,
        stats: run.stats.clone(),
        records: Vec::new(),
        arquivo: None,
        download_url: None,
        sheets_url: None,
        sheets_error: None,
        export_error: None,
    };
    if run.records.is_empty() {
        return Ok(Json(response));
    }

    let stem = state.next_stem(&query);
    let file = file_exporter(params.formato, &state.config.export_dir);
    let mut exporters: Vec<&dyn Exporter> = vec![file.as_ref()];
    if params.sheets {
        match &state.sheets {
            Some(sheets) => exporters.push(sheets),
            None => {
                response.sheets_error = Some("Google Sheets is not configured".to_string());
            }
        }
    }
    let report = run.export(&exporters, &stem).await;

    for outcome in report.outcomes {
        match (outcome.target, outcome.result) {
            ("Google Sheets", Ok(url)) => response.sheets_url = Some(url),
            ("Google Sheets", Err(e)) => response.sheets_error = Some(e.to_string()),
            (_, Ok(_)) => {
                let filename = format!("{}.{}", stem, params.formato.extension());
                response.download_url = Some(format!("/download/{}", filename));
                response.arquivo = Some(filename);
            }
            (target, Err(e)) => {
                tracing::error!("❌ {} export failed, returning records only: {}", target, e);
                response.export_error = Some(e.to_string());
            }
        }
    }

    response.stage = run.stage;
    response.records = run.records;
    Ok(Json(response))
}

/// True for a bare file name with no way to leave the export directory.
fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

fn content_type_for(name: &str) -> &'static str {
    if name.ends_with(".csv") {
        "text/csv; charset=utf-8"
    } else if name.ends_with(".xlsx") {
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
    } else {
        "application/octet-stream"
    }
}

/// GET /download/:filename
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    if !is_safe_filename(&filename) {
        return Err(AppError::Validation(format!(
            "Nome de arquivo inválido: {}",
            filename
        )));
    }

    let path = state.config.export_dir.join(&filename);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound(format!(
                "Arquivo não encontrado: {}",
                filename
            )));
        }
        Err(e) => {
            return Err(AppError::Export(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )));
        }
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type_for(&filename).to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response())
}
