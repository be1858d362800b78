//! MathML image endpoint
//!
//! `GET /mathml?docId=<token>&elemId=<handle>&xmlHash=<digest>` returns the
//! PNG for one equation. A known digest is served straight from the image
//! cache; otherwise the fragment is looked up through the session and
//! rendered.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::error::{AppError, EquationError};
use crate::identity::FragmentHandle;
use crate::image_cache::RenderedImage;
use crate::service::FetchOutcome;
use crate::session::SessionToken;
use crate::state::AppState;
use crate::traits::DocumentController;

const NOT_FOUND_MESSAGE: &str = "MathML PNG file was not found.";

/// Query parameters of the image endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MathmlQuery {
    /// Session token of the document
    pub doc_id: Option<String>,
    /// Fragment handle within the document
    pub elem_id: Option<FragmentHandle>,
    /// Digest of the normalized markup, optionally with a `.png` suffix
    pub xml_hash: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Create the MathML router
pub fn router<C>() -> Router<AppState<C>>
where
    C: DocumentController + 'static,
{
    Router::new()
        .route("/health", get(health_check))
        .route("/mathml", get(fetch_equation::<C>))
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Serve the PNG of one equation
async fn fetch_equation<C>(
    State(state): State<AppState<C>>,
    Query(query): Query<MathmlQuery>,
) -> Result<Response, AppError>
where
    C: DocumentController + 'static,
{
    let service = state.service().clone();
    let digest = query
        .xml_hash
        .map(|hash| hash.trim_end_matches(".png").to_string());

    let outcome = match (query.doc_id, query.elem_id, digest) {
        (doc_id, elem_id, Some(digest)) => {
            let by_digest = {
                let service = service.clone();
                run_blocking(move || service.fetch_by_digest(&digest)).await?
            };
            match (by_digest, doc_id, elem_id) {
                (FetchOutcome::NotFound, Some(doc_id), Some(elem_id)) => {
                    let token = SessionToken::from(doc_id.as_str());
                    run_blocking(move || service.fetch(&token, elem_id)).await?
                }
                (outcome, _, _) => outcome,
            }
        }
        (Some(doc_id), Some(elem_id), None) => {
            let token = SessionToken::from(doc_id.as_str());
            run_blocking(move || service.fetch(&token, elem_id)).await?
        }
        _ => {
            return Err(AppError::BadRequest(
                "Expected docId and elemId, or xmlHash".to_string(),
            ))
        }
    };

    match outcome {
        FetchOutcome::Found(image) => png_response(&image, state.config().http.cache_max_age),
        FetchOutcome::NotFound => Err(AppError::NotFound(NOT_FOUND_MESSAGE.to_string())),
    }
}

/// Rendering and disk access block; keep them off the async workers
async fn run_blocking<F>(task: F) -> Result<FetchOutcome, AppError>
where
    F: FnOnce() -> crate::error::Result<FetchOutcome> + Send + 'static,
{
    let outcome = tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| EquationError::Join(e.to_string()))??;
    Ok(outcome)
}

fn png_response(image: &RenderedImage, max_age: u64) -> Result<Response, AppError> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/png")
        .header(header::CACHE_CONTROL, format!("max-age={}", max_age))
        .header(header::ETAG, format!("\"{}\"", image.digest))
        .body(Body::from(image.bytes.as_ref().clone()))
        .map_err(|e| AppError::Internal(e.to_string()))
}
