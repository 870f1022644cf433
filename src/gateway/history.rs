use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::clog_error;
use crate::errors::DeliveryError;

use super::GatewayState;

#[derive(Deserialize)]
pub struct HistoryParams {
    user1: Option<i64>,
    user2: Option<i64>,
    limit: Option<i64>,
    offset: Option<i64>,
}

/// `GET /messages?user1=&user2=&limit=&offset=`: conversation history,
/// newest first, readable only by a party to the conversation.
pub async fn query_messages(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, "Authorization header missing");
    };
    let claims = match state.auth.verify(token) {
        Ok(claims) => claims,
        Err(_) => return error_response(StatusCode::UNAUTHORIZED, "Invalid or expired token"),
    };

    let (user1, user2) = match (params.user1, params.user2) {
        (Some(a), Some(b)) => (a, b),
        _ => return error_response(StatusCode::BAD_REQUEST, "user1 and user2 are required"),
    };

    if authorize_party(claims.user_id, user1, user2).is_err() {
        return error_response(StatusCode::FORBIDDEN, "Forbidden");
    }

    let limit = params.limit.unwrap_or(20).clamp(1, 200);
    let offset = params.offset.unwrap_or(0).max(0);

    match state.store.query_conversation(user1, user2, limit, offset).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => {
            clog_error!("history query failed: {}", err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

/// Only a participant may read a conversation.
fn authorize_party(caller: i64, user1: i64, user2: i64) -> Result<(), DeliveryError> {
    if caller == user1 || caller == user2 {
        Ok(())
    } else {
        Err(DeliveryError::Forbidden)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
