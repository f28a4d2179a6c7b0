// src/server/mod.rs

//! Read-only HTTP query surface.
//!
//! - `GET /api/materials`: structured records per material
//! - `GET /`: HTML index of cleaned pages
//! - `GET /view/{material}/{file}`: one cleaned page

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::error::{AppError, Result};
use crate::models::ServerConfig;
use crate::services::Catalog;
use crate::utils::escape_html;

#[derive(Clone)]
pub struct AppState {
    catalog: Arc<Catalog>,
}

/// Error returned by handlers, rendered as `{"error": ...}`.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    App(AppError),
}

impl From<AppError> for ApiError {
    fn from(error: AppError) -> Self {
        Self::App(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::App(error) => {
                let status = match &error {
                    AppError::RootMissing(_) => StatusCode::NOT_FOUND,
                    AppError::InvalidKey { .. } => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    log::error!("Request failed: {}", error);
                }
                (status, error.to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Build the router over a catalog.
pub fn router(catalog: Arc<Catalog>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/materials", get(materials))
        .route("/view/{material}/{file}", get(view))
        .layer(CorsLayer::permissive())
        .with_state(AppState { catalog })
}

/// Bind the configured address and serve until the process stops.
pub async fn serve(config: &ServerConfig, catalog: Arc<Catalog>) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Serving on http://{}", listener.local_addr()?);
    axum::serve(listener, router(catalog)).await?;
    Ok(())
}

async fn materials(State(state): State<AppState>) -> std::result::Result<Response, ApiError> {
    let materials = state.catalog.materials().await?;
    Ok(Json(materials).into_response())
}

async fn index(State(state): State<AppState>) -> std::result::Result<Html<String>, ApiError> {
    let files = state.catalog.cleaned_files().await?;

    let mut page = String::from(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Materials</title></head><body>\n<h1>Materials</h1>\n",
    );
    for (material, names) in &files {
        page.push_str(&format!("<h2>{}</h2>\n<ul>\n", escape_html(material)));
        for name in names {
            page.push_str(&format!(
                "<li><a href=\"/view/{}/{}\">{}</a></li>\n",
                encode_segment(material),
                encode_segment(name),
                escape_html(name)
            ));
        }
        page.push_str("</ul>\n");
    }
    page.push_str("</body></html>\n");
    Ok(Html(page))
}

async fn view(
    State(state): State<AppState>,
    Path((material, file)): Path<(String, String)>,
) -> std::result::Result<Html<String>, ApiError> {
    match state.catalog.cleaned_file(&material, &file).await? {
        Some(bytes) => Ok(Html(String::from_utf8_lossy(&bytes).into_owned())),
        None => Err(ApiError::NotFound(format!("{}/{} not found", material, file))),
    }
}

fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}
