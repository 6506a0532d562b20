//! The core user-facing chat surface (spec §6): credits, predict (collected
//! and streamed), session history, and uploaded-file retrieval.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use flowise_proxy_auth::AuthenticatedPrincipal;
use flowise_proxy_relay::{PredictRequest, StreamingRelay};
use flowise_proxy_uploads::UploadRequest;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{error::ApiError, state::AppState};

/// The relay instance scoped to this caller's own bearer token — needed
/// whenever accounting runs against the remote ledger (spec §4.C6: the
/// remote backend authorizes by the caller's token, not a shared service
/// credential this proxy would otherwise have to hold).
fn relay_for(state: &AppState, principal: &AuthenticatedPrincipal) -> StreamingRelay {
    state
        .relay
        .with_accounting(state.accounting.scoped_for(&principal.raw_token))
}

pub async fn credits(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
) -> Result<Json<Value>, ApiError> {
    let balance = state
        .accounting
        .scoped_for(&principal.raw_token)
        .get_balance(&principal.user_id)
        .await?
        .unwrap_or(0);
    Ok(Json(json!({
        "user_id": principal.user_id,
        "username": principal.username,
        "credits": balance,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UploadBody {
    pub data: String,
    pub name: String,
    pub mime: String,
}

impl From<UploadBody> for UploadRequest {
    fn from(body: UploadBody) -> Self {
        UploadRequest {
            data: body.data,
            name: body.name,
            mime: body.mime,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PredictBody {
    pub chatflow_id: String,
    pub question: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub uploads: Vec<UploadBody>,
}

impl From<PredictBody> for PredictRequest {
    fn from(body: PredictBody) -> Self {
        PredictRequest {
            chatflow_id: body.chatflow_id,
            question: body.question,
            session_id: body.session_id,
            uploads: body.uploads.into_iter().map(Into::into).collect(),
        }
    }
}

/// `POST /chat/predict` — collects the full stream before replying (spec
/// §6 non-streaming variant).
pub async fn predict(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    Json(body): Json<PredictBody>,
) -> Result<Json<Value>, ApiError> {
    let relay = relay_for(&state, &principal);
    let (response, metadata) = relay.predict_collect(&principal.user_id, body.into()).await?;
    Ok(Json(json!({ "response": response, "metadata": metadata })))
}

/// `POST /chat/predict/stream/store` — the core streaming endpoint. Each
/// relayed event is newline-delimited JSON (spec §5: "newline-separated is
/// acceptable downstream"), with the session id echoed as a response
/// header so clients that only care about it don't have to parse the
/// first frame.
pub async fn predict_stream_store(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    Json(body): Json<PredictBody>,
) -> Result<Response, ApiError> {
    let relay = relay_for(&state, &principal);
    let stream = relay.predict_stream_store(&principal.user_id, body.into()).await?;

    let session_id = stream.session_id.clone();
    let ndjson = stream.events.map(|event| {
        let mut line = serde_json::to_vec(&event).unwrap_or_default();
        line.push(b'\n');
        Ok::<_, std::io::Error>(bytes::Bytes::from(line))
    });

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header("X-Session-Id", session_id)
        .body(Body::from_stream(ndjson))
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(response)
}

pub async fn list_sessions(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
) -> Result<Json<Value>, ApiError> {
    let sessions = state.sessions.list_sessions_for_user(&principal.user_id).await?;
    Ok(Json(json!({ "count": sessions.len(), "sessions": sessions })))
}

pub async fn session_history(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = state
        .sessions
        .find_session(&session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("session {session_id:?} not found")))?;
    if session.user_id != principal.user_id && !principal.role.is_privileged() {
        return Err(ApiError::Forbidden("caller does not own this session".to_string()));
    }

    let messages = state.sessions.history(&session_id).await?;
    let mut history = Vec::with_capacity(messages.len());
    for message in &messages {
        let uploads = state.sessions.hydrate_uploads(message).await?;
        history.push(json!({
            "role": message.role.as_str(),
            "content": message.content,
            "metadata": message.metadata.as_deref().and_then(|raw| serde_json::from_str::<Value>(raw).ok()),
            "uploads": uploads,
            "created_at": message.created_at,
        }));
    }
    Ok(Json(json!({ "session_id": session_id, "count": history.len(), "history": history })))
}

pub async fn get_file(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    Path(file_id): Path<String>,
) -> Result<Response, ApiError> {
    let upload = state
        .uploads
        .find_by_id(&file_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file {file_id:?} not found")))?;
    if upload.user_id != principal.user_id && !principal.role.is_privileged() {
        return Err(ApiError::Forbidden("caller does not own this file".to_string()));
    }
    let bytes = state.uploads.get_bytes(&upload).await?;
    Ok(([(header::CONTENT_TYPE, upload.mime_type.clone())], bytes).into_response())
}

pub async fn get_thumbnail(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    Path(file_id): Path<String>,
) -> Result<Response, ApiError> {
    let upload = state
        .uploads
        .find_by_id(&file_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file {file_id:?} not found")))?;
    if upload.user_id != principal.user_id && !principal.role.is_privileged() {
        return Err(ApiError::Forbidden("caller does not own this file".to_string()));
    }
    let (bytes, content_type) = state.uploads.get_thumbnail(&upload).await?;
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

pub async fn files_for_session(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = state
        .sessions
        .find_session(&session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("session {session_id:?} not found")))?;
    if session.user_id != principal.user_id && !principal.role.is_privileged() {
        return Err(ApiError::Forbidden("caller does not own this session".to_string()));
    }
    let files = state.uploads.list_for_session(&session_id).await?;
    Ok(Json(json!({ "count": files.len(), "files": files })))
}
