use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use palaver_core::{
    moderation, CommentRecord, CommentSubmission, FlagOutcome, ModerationError, SecurityData,
    SubmissionError,
};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

const USER_HEADER: &str = "x-palaver-user";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Deserialize)]
pub struct TargetQuery {
    pub content_type: Option<String>,
    pub object_pk: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostCommentRequest {
    pub content_type: Option<String>,
    pub object_pk: Option<String>,
    pub timestamp: i64,
    pub security_hash: String,
    #[serde(default)]
    pub honeypot: String,
    pub comment: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PostCommentResponse {
    pub comment: CommentRecord,
    pub deduplicated: bool,
}

#[derive(Debug, Deserialize)]
pub struct EditCommentRequest {
    pub comment: String,
}

#[derive(Debug, Serialize)]
pub struct CommentListResponse {
    pub comments: Vec<CommentRecord>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct FlagResponse {
    pub comment_id: i64,
    pub created: bool,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: usize,
}

/// Issue the hidden security fields for a fresh submission form targeting
/// one content object.
pub async fn comment_form(
    State(state): State<AppState>,
    Query(query): Query<TargetQuery>,
) -> Result<Json<SecurityData>, ApiError> {
    let (Some(content_type), Some(object_pk)) = (query.content_type, query.object_pk) else {
        return Err(bad_request("Missing content_type or object_pk field.", None));
    };
    state
        .pipeline
        .issue_form(&content_type, &object_pk)
        .map(Json)
        .map_err(|err| bad_request(&err.to_string(), None))
}

pub async fn post_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PostCommentRequest>,
) -> Result<(StatusCode, Json<PostCommentResponse>), ApiError> {
    let submission = CommentSubmission {
        content_type: request.content_type,
        object_pk: request.object_pk,
        timestamp: request.timestamp,
        security_hash: request.security_hash,
        honeypot: request.honeypot,
        body: request.comment,
        parent_id: request.parent_id,
        author: header_user(&headers),
        site_id: state.site_id,
    };

    match state.pipeline.submit(submission) {
        Ok(outcome) => {
            let status = if outcome.deduplicated {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            Ok((
                status,
                Json(PostCommentResponse {
                    comment: outcome.comment,
                    deduplicated: outcome.deduplicated,
                }),
            ))
        },
        Err(err) => Err(submission_error(&state, err)),
    }
}

pub async fn list_comments(
    State(state): State<AppState>,
    Query(query): Query<TargetQuery>,
) -> Result<Json<CommentListResponse>, ApiError> {
    let (Some(content_type), Some(object_pk)) = (query.content_type, query.object_pk) else {
        return Err(bad_request("Missing content_type or object_pk field.", None));
    };
    let comments = state
        .store
        .list_for_target(&content_type, &object_pk)
        .map_err(|err| internal_error("Failed to list comments", err))?;
    let total = comments.len();
    Ok(Json(CommentListResponse { comments, total }))
}

pub async fn get_comment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CommentRecord>, ApiError> {
    let comment = state
        .store
        .get(id)
        .map_err(|err| internal_error("Failed to fetch comment", err))?;
    match comment {
        Some(comment) => Ok(Json(comment)),
        None => Err(not_found(id)),
    }
}

/// Latest public comments across the whole site, newest first.
pub async fn comment_feed(
    State(state): State<AppState>,
) -> Result<Json<CommentListResponse>, ApiError> {
    let comments = state
        .store
        .recent_public(state.site_id, None)
        .map_err(|err| internal_error("Failed to fetch comment feed", err))?;
    let total = comments.len();
    Ok(Json(CommentListResponse { comments, total }))
}

/// Author-only body edit.
pub async fn edit_comment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<EditCommentRequest>,
) -> Result<Json<CommentRecord>, ApiError> {
    let user = require_user(&headers)?;
    let comment = state
        .store
        .get(id)
        .map_err(|err| internal_error("Failed to fetch comment", err))?
        .ok_or_else(|| not_found(id))?;
    if !state.store.is_editable_by(&comment, &user) {
        return Err(forbidden("Only the comment author may edit it."));
    }
    if request.comment.trim().is_empty() {
        return Err(validation_error("comment body cannot be empty", "comment"));
    }
    let edited = state
        .store
        .update_body(id, &request.comment)
        .map_err(|err| internal_error("Failed to edit comment", err))?
        .ok_or_else(|| not_found(id))?;
    Ok(Json(edited))
}

pub async fn flag_comment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<FlagResponse>, ApiError> {
    let user = require_user(&headers)?;
    let outcome =
        moderation::perform_flag(&state.store, &user, id).map_err(moderation_error)?;
    Ok(Json(FlagResponse {
        comment_id: id,
        created: outcome == FlagOutcome::Created,
    }))
}

pub async fn approve_comment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<CommentRecord>, ApiError> {
    let user = require_user(&headers)?;
    moderation::perform_approve(&state.store, state.gate.as_ref(), &user, id)
        .map(Json)
        .map_err(moderation_error)
}

pub async fn remove_comment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<CommentRecord>, ApiError> {
    let user = require_user(&headers)?;
    moderation::perform_remove(&state.store, state.gate.as_ref(), &user, id)
        .map(Json)
        .map_err(moderation_error)
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<DeleteResponse>, ApiError> {
    let user = require_user(&headers)?;
    moderation::perform_delete(&state.store, state.gate.as_ref(), &user, id)
        .map(|deleted| Json(DeleteResponse { deleted }))
        .map_err(moderation_error)
}

fn header_user(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn require_user(headers: &HeaderMap) -> Result<String, ApiError> {
    header_user(headers).ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Authentication required.".to_string(),
                code: 401,
                field: None,
            }),
        )
    })
}

/// Map a pipeline failure onto the wire. Security failures are logged as
/// potential abuse and answered with an opaque message unless debug mode is
/// on; validation failures stay detailed so the form can be redisplayed.
fn submission_error(state: &AppState, err: SubmissionError) -> ApiError {
    match err {
        SubmissionError::MissingFields => {
            bad_request("Missing content_type or object_pk field.", None)
        },
        SubmissionError::Resolve(resolve) => bad_request(&resolve.to_string(), None),
        SubmissionError::Security(security) => {
            tracing::warn!("comment submission failed security verification: {security}");
            if state.debug {
                bad_request(&format!("The comment form failed security verification: {security}"), None)
            } else {
                bad_request("The comment form failed security verification.", None)
            }
        },
        SubmissionError::Validation { field, message } => validation_error(&message, field),
        SubmissionError::Rejected { hook } => {
            bad_request(&format!("Comment rejected by {hook}."), None)
        },
        SubmissionError::Internal(err) => internal_error("Failed to save comment", err),
    }
}

fn moderation_error(err: ModerationError) -> ApiError {
    match err {
        ModerationError::NotFound(id) => not_found(id),
        denied @ ModerationError::PermissionDenied { .. } => forbidden(&denied.to_string()),
        ModerationError::Internal(err) => internal_error("Moderation action failed", err),
    }
}

fn bad_request(message: &str, field: Option<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
            code: 400,
            field,
        }),
    )
}

fn validation_error(message: &str, field: &str) -> ApiError {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ErrorResponse {
            error: message.to_string(),
            code: 422,
            field: Some(field.to_string()),
        }),
    )
}

fn forbidden(message: &str) -> ApiError {
    (
        StatusCode::FORBIDDEN,
        Json(ErrorResponse {
            error: message.to_string(),
            code: 403,
            field: None,
        }),
    )
}

fn not_found(id: i64) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("Comment {id} not found"),
            code: 404,
            field: None,
        }),
    )
}

fn internal_error(message: &str, err: anyhow::Error) -> ApiError {
    tracing::error!("{message}: {err:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: message.to_string(),
            code: 500,
            field: None,
        }),
    )
}
