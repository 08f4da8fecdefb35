//! HTTP server implementation using axum

use crate::batch::{self, BatchReport, BatchRun, RowOutcome};
use crate::error::{Error, Result};
use crate::source::{list_templates, read_workbook, resolve_download};
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Path as AxumPath, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Paths and limits for the contract form server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind (default: 0.0.0.0)
    pub host: String,
    /// Port to listen on (default: 5000)
    pub port: u16,
    /// Directory holding the fillable PDF templates
    pub template_dir: PathBuf,
    /// Example spreadsheet offered at /download_template
    pub example_spreadsheet: PathBuf,
    /// Directory that receives uploaded spreadsheets
    pub upload_dir: PathBuf,
    /// Directory that receives generated documents and the archive
    pub output_dir: PathBuf,
    /// File name of the archive inside `output_dir`
    pub archive_name: String,
    /// Maximum accepted upload size in bytes (default: 20MB)
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            template_dir: PathBuf::from("templates/document_templates"),
            example_spreadsheet: PathBuf::from("templates/data_template.xlsx"),
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("output"),
            archive_name: "contracts.zip".to_string(),
            max_upload_bytes: 20 * 1024 * 1024, // 20MB
        }
    }
}

impl ServerConfig {
    /// Build a configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or("PORT", lookup("PORT"), defaults.port),
            template_dir: lookup("CONTRACTS_TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.template_dir),
            example_spreadsheet: lookup("CONTRACTS_EXAMPLE_SPREADSHEET")
                .map(PathBuf::from)
                .unwrap_or(defaults.example_spreadsheet),
            upload_dir: lookup("CONTRACTS_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            output_dir: lookup("CONTRACTS_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            archive_name: defaults.archive_name,
            max_upload_bytes: parse_or(
                "CONTRACTS_MAX_UPLOAD_BYTES",
                lookup("CONTRACTS_MAX_UPLOAD_BYTES"),
                defaults.max_upload_bytes,
            ),
        }
    }

    pub fn archive_path(&self) -> PathBuf {
        self.output_dir.join(&self.archive_name)
    }
}

fn parse_or<T: std::str::FromStr + Copy + std::fmt::Display>(
    key: &str,
    raw: Option<String>,
    default: T,
) -> T {
    match raw {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "Invalid value, using default");
            default
        }),
    }
}

/// Shared state for request handlers
#[derive(Clone)]
pub struct AppState {
    config: Arc<ServerConfig>,
    /// Serializes batch runs: the output directory and archive path are shared
    run_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Store the upload and run the batch. Blocking; call from `spawn_blocking`.
    fn generate(&self, file_name: &str, data: &[u8]) -> Result<BatchRun> {
        let _guard = self.run_lock.lock();

        let stored = self.store_upload(file_name, data)?;
        tracing::info!(upload = %stored.display(), "Processing upload");

        let sheet = read_workbook(&stored)?;
        batch::run(
            &sheet,
            &self.config.template_dir,
            &self.config.output_dir,
            &self.config.archive_name,
        )
    }

    fn store_upload(&self, file_name: &str, data: &[u8]) -> Result<PathBuf> {
        let dir = &self.config.upload_dir;
        std::fs::create_dir_all(dir).map_err(|e| Error::WriteFailed {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let base_name = Path::new(file_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.xlsx".to_string());
        let path = dir.join(format!("{}_{}", uuid::Uuid::new_v4(), base_name));

        std::fs::write(&path, data).map_err(|e| Error::WriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(path)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::warn!(error = %self, "Request rejected");
        }
        (status, self.client_message()).into_response()
    }
}

/// JSON body returned by `POST /api/upload`
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub files: Vec<String>,
    pub archive_url: String,
    pub report: BatchReport,
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/", get(index).post(upload))
        .route("/upload", post(upload))
        .route("/api/upload", post(api_upload))
        .route("/download/:filename", get(download))
        .route("/download_zip", get(download_zip))
        .route("/download_template", get(download_template))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let templates = list_templates(&state.config.template_dir);
    Html(render_index(&templates))
}

async fn upload(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Html<String>> {
    let run = handle_upload(&state, multipart).await?;
    Ok(Html(render_success(&run.report)))
}

async fn api_upload(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>> {
    let run = handle_upload(&state, multipart).await?;
    Ok(Json(UploadResponse {
        files: run.report.produced(),
        archive_url: "/download_zip".to_string(),
        report: run.report,
    }))
}

async fn download(
    State(state): State<AppState>,
    AxumPath(filename): AxumPath<String>,
) -> Result<Response> {
    let path = resolve_download(&state.config.output_dir, &filename)?;
    send_attachment(&path).await
}

async fn download_zip(State(state): State<AppState>) -> Result<Response> {
    send_attachment(&state.config.archive_path()).await
}

async fn download_template(State(state): State<AppState>) -> Result<Response> {
    send_attachment(&state.config.example_spreadsheet).await
}

async fn health() -> &'static str {
    "ok"
}

async fn handle_upload(
    state: &AppState,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<BatchRun> {
    let multipart = multipart.map_err(|e| {
        tracing::debug!(error = %e, "Upload is not a multipart form");
        Error::MissingInput {
            reason: "No file part".to_string(),
        }
    })?;
    let (file_name, data) = read_upload(multipart).await?;

    let state = state.clone();
    tokio::task::spawn_blocking(move || state.generate(&file_name, &data))
        .await
        .map_err(|e| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Task join error: {}", e),
            ))
        })?
}

/// Pull the `file` part out of the form
async fn read_upload(mut multipart: Multipart) -> Result<(String, Vec<u8>)> {
    while let Some(field) = multipart.next_field().await.map_err(|e| Error::MissingInput {
        reason: format!("Invalid multipart body: {}", e),
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        if file_name.is_empty() {
            return Err(Error::MissingInput {
                reason: "No selected file".to_string(),
            });
        }

        let data = field.bytes().await.map_err(|e| Error::MissingInput {
            reason: format!("Could not read upload: {}", e),
        })?;
        return Ok((file_name, data.to_vec()));
    }

    Err(Error::MissingInput {
        reason: "No file part".to_string(),
    })
}

async fn send_attachment(path: &Path) -> Result<Response> {
    let data = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut response = data.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(path)),
    );
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&file_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("json") => "application/json",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("xls") => "application/vnd.ms-excel",
        Some("ods") => "application/vnd.oasis.opendocument.spreadsheet",
        _ => "application/octet-stream",
    }
}

/// `attachment` disposition with an ASCII fallback name and an RFC 5987 UTF-8 name
fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        percent_encode(file_name)
    )
}

/// RFC 3986 unreserved characters stay literal; everything else is escaped
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Encode a file name for an href path segment or an RFC 5987 `filename*` value
fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED).to_string()
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const PAGE_STYLE: &str = "body{font-family:sans-serif;max-width:48rem;margin:2rem auto;}\
table{border-collapse:collapse;}td,th{border:1px solid #ccc;padding:.25rem .5rem;text-align:left;}";

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"de\">\n<head><meta charset=\"utf-8\"><title>{title}</title>\
<style>{PAGE_STYLE}</style></head>\n<body>\n<h1>{title}</h1>\n{body}</body>\n</html>\n",
        title = escape_html(title),
    )
}

fn render_index(templates: &[String]) -> String {
    let mut body = String::from(
        "<form action=\"/upload\" method=\"post\" enctype=\"multipart/form-data\">\n\
<input type=\"file\" name=\"file\" accept=\".xlsx,.xls,.ods\">\n\
<button type=\"submit\">Verträge erstellen</button>\n</form>\n\
<p><a href=\"/download_template\">Excel-Vorlage herunterladen</a></p>\n",
    );

    if templates.is_empty() {
        body.push_str("<p>Keine PDF-Vorlagen gefunden.</p>\n");
    } else {
        body.push_str("<h2>Verfügbare Vorlagen</h2>\n<ul>\n");
        for name in templates {
            body.push_str(&format!("<li>{}</li>\n", escape_html(name)));
        }
        body.push_str("</ul>\n");
    }

    page("Vertragsgenerator", &body)
}

fn render_success(report: &BatchReport) -> String {
    let mut body = format!(
        "<p>Tarif: {} &middot; erstellt: {} &middot; übersprungen: {} &middot; fehlgeschlagen: {}</p>\n",
        escape_html(&report.contract_type),
        report.produced_count(),
        report.skipped_count(),
        report.failed_count(),
    );

    let files = report.produced();
    if !files.is_empty() {
        body.push_str("<ul>\n");
        for name in &files {
            body.push_str(&format!(
                "<li><a href=\"/download/{}\">{}</a></li>\n",
                percent_encode(name),
                escape_html(name)
            ));
        }
        body.push_str("</ul>\n");
    }
    body.push_str("<p><a href=\"/download_zip\">Alle als ZIP herunterladen</a></p>\n");

    body.push_str("<table>\n<tr><th>Zeile</th><th>Status</th><th>Details</th></tr>\n");
    for row in &report.rows {
        let (status, detail) = match &row.outcome {
            RowOutcome::Produced { file_name, .. } => ("erstellt", file_name.clone()),
            RowOutcome::Skipped { reason } => ("übersprungen", reason.to_string()),
            RowOutcome::Failed { error, .. } => ("Fehler", error.clone()),
        };
        body.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            row.line,
            status,
            escape_html(&detail)
        ));
    }
    body.push_str("</table>\n<p><a href=\"/\">Zurück</a></p>\n");

    page("Verträge erstellt", &body)
}

/// Run the server with configuration from the environment
pub async fn run_server() -> anyhow::Result<()> {
    run_server_with_config(ServerConfig::from_env()).await
}

/// Run the server with full configuration
pub async fn run_server_with_config(config: ServerConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(
        templates = %config.template_dir.display(),
        output = %config.output_dir.display(),
        "Template directory has {} PDF(s)",
        list_templates(&config.template_dir).len()
    );

    let app = build_router(AppState::new(config));
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Contract form server listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
