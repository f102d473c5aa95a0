//! HTTP API surface.
//!
//! JSON in/out; the UI layer in front of this service is out of scope,
//! these endpoints are its contract. Errors map onto status codes through
//! [`MatrixError::to_status`]; the body is always `{"error": "..."}`.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post},
    Router,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use matrix_domain::{MatrixNode, Member, NetworkStats, UtilityStatus};
use sheet_store::MemberFieldPatch;

use crate::error::MatrixError;
use crate::services::{
    BillExtraction, DocumentAnalyzer, NewRegistration, NewUtility, ReconciliationEngine,
    RegisterOutcome, SyncStatus,
};

/// Shared HTTP server state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub analyzer: Option<Arc<dyn DocumentAnalyzer>>,
}

impl IntoResponse for MatrixError {
    fn into_response(self) -> Response {
        let status = self.to_status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, MatrixError>;

/// Build the HTTP router with all API endpoints
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/session", get(session))
        .route("/api/members", get(members))
        .route("/api/members/:member_id", patch(update_profile))
        .route("/api/members/:member_id/utilities", post(add_utility))
        .route(
            "/api/members/:member_id/utilities/:utility_id/status",
            post(update_utility_status),
        )
        .route("/api/tree/:root_id", get(tree))
        .route("/api/stats", get(stats))
        .route("/api/utilities/:utility_id/attachment", get(attachment))
        .route("/api/insights/extract", post(extract_bill))
        .route("/api/insights/summary/:root_id", get(network_summary))
        .with_state(state)
}

/// Health check endpoint (no auth, no remote round-trip)
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn register(
    State(state): State<AppState>,
    Json(registration): Json<NewRegistration>,
) -> ApiResult<Json<RegisterOutcome>> {
    let outcome = state.engine.register_member(registration).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<Member>> {
    let member = state.engine.login(&request.username, &request.password).await?;
    Ok(Json(member))
}

async fn logout(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.engine.logout().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn session(State(state): State<AppState>) -> Json<Option<Member>> {
    Json(state.engine.current_member().await)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MembersResponse {
    members: Vec<Member>,
    status: SyncStatus,
}

async fn members(State(state): State<AppState>) -> ApiResult<Json<MembersResponse>> {
    let members = state.engine.fetch_members().await?;
    let status = state.engine.status().await;
    Ok(Json(MembersResponse { members, status }))
}

async fn update_profile(
    State(state): State<AppState>,
    Path(member_id): Path<String>,
    Json(fields): Json<MemberFieldPatch>,
) -> ApiResult<Json<Member>> {
    let outcome = state.engine.update_member_profile(&member_id, fields).await?;
    Ok(Json(outcome.member))
}

async fn add_utility(
    State(state): State<AppState>,
    Path(member_id): Path<String>,
    Json(new_utility): Json<NewUtility>,
) -> ApiResult<Json<Member>> {
    let outcome = state.engine.add_utility(&member_id, new_utility).await?;
    Ok(Json(outcome.member))
}

#[derive(Debug, Deserialize)]
struct StatusChangeRequest {
    status: UtilityStatus,
}

async fn update_utility_status(
    State(state): State<AppState>,
    Path((member_id, utility_id)): Path<(String, String)>,
    Json(request): Json<StatusChangeRequest>,
) -> ApiResult<Json<Member>> {
    // The acting identity is the session member; status decisions are an
    // authenticated operation.
    let actor = state
        .engine
        .current_member()
        .await
        .ok_or(MatrixError::NotAuthorized)?;

    let outcome = state
        .engine
        .update_utility_status(&actor.id, &member_id, &utility_id, request.status)
        .await?;
    Ok(Json(outcome.member))
}

async fn tree(
    State(state): State<AppState>,
    Path(root_id): Path<String>,
) -> ApiResult<Json<MatrixNode>> {
    let node = state
        .engine
        .tree(&root_id)
        .await?
        .ok_or(MatrixError::MemberNotFound)?;
    Ok(Json(node))
}

async fn stats(State(state): State<AppState>) -> ApiResult<Json<NetworkStats>> {
    Ok(Json(state.engine.stats().await?))
}

async fn attachment(
    State(state): State<AppState>,
    Path(utility_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let data = state
        .engine
        .fetch_attachment(&utility_id)
        .await?
        .ok_or(MatrixError::UtilityNotFound)?;
    Ok(Json(json!({ "attachmentData": data })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractRequest {
    /// Base64 document payload.
    data: String,
    mime_type: String,
}

/// Pre-fill a utility form from an uploaded bill. Analyzer problems never
/// block manual entry: they degrade to an empty extraction.
async fn extract_bill(
    State(state): State<AppState>,
    Json(request): Json<ExtractRequest>,
) -> Json<BillExtraction> {
    let Some(analyzer) = &state.analyzer else {
        return Json(BillExtraction::default());
    };

    let document = match base64::engine::general_purpose::STANDARD.decode(&request.data) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Bill payload is not valid base64");
            return Json(BillExtraction::default());
        }
    };

    match analyzer.extract_bill(&document, &request.mime_type).await {
        Ok(extraction) => Json(extraction),
        Err(e) => {
            warn!(error = %e, "Bill extraction failed, falling back to manual entry");
            Json(BillExtraction::default())
        }
    }
}

/// Advisory network report. Always answers with text; analyzer failures
/// degrade to a static notice.
async fn network_summary(
    State(state): State<AppState>,
    Path(root_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let node = state
        .engine
        .tree(&root_id)
        .await?
        .ok_or(MatrixError::MemberNotFound)?;

    let summary = match &state.analyzer {
        None => "Network analysis is not configured.".to_string(),
        Some(analyzer) => match analyzer.summarize_network(&node).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Network summary failed");
                "Network analysis is unavailable right now.".to_string()
            }
        },
    };
    Ok(Json(json!({ "summary": summary })))
}

/// Start the HTTP API server
pub async fn start_http_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Starting HTTP API server on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    Ok(())
}
