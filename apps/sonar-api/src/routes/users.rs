//! Conversation history and presence lookups for signed-in users.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody, FieldError};
use crate::models::message::Message;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/messages/{user_id}", get(list_conversation))
        .route("/users/online", get(online_users))
}

// ---------------------------------------------------------------------------
// GET /api/v1/users/messages/{user_id}
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/users/messages/{user_id}",
    tag = "Messages",
    security(("bearer" = [])),
    params(
        ("user_id" = String, Path, description = "The other participant"),
    ),
    responses(
        (status = 200, description = "Messages between the caller and user_id, oldest first", body = Vec<Message>),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn list_conversation(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Path(other_id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let other_id = other_id.trim();
    if other_id.is_empty() {
        return Err(ApiError::validation(vec![FieldError {
            field: "user_id".to_string(),
            message: "user_id is required".to_string(),
        }]));
    }

    let messages = state.messages.history(&user_id, other_id).await?;
    Ok(Json(messages))
}

// ---------------------------------------------------------------------------
// GET /api/v1/users/online
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct OnlineUsersResponse {
    pub users: Vec<String>,
    /// `[identity, activity]` pairs.
    #[schema(value_type = Vec<Vec<String>>)]
    pub activities: Vec<(String, String)>,
}

#[utoipa::path(
    get,
    path = "/api/v1/users/online",
    tag = "Presence",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Users connected to this server", body = OnlineUsersResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn online_users(
    _user: AuthUser,
    State(state): State<AppState>,
) -> Json<OnlineUsersResponse> {
    let snapshot = state.gateway.presence.snapshot();
    Json(OnlineUsersResponse {
        users: snapshot.users,
        activities: snapshot.activities,
    })
}
