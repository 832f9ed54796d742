//! HTTP route handlers for the control API.
//!
//! Every route is a `GET` with its parameters in the path. Outcomes, including
//! failures, are answered with status 200 and a [`Reply`] body; only unknown
//! paths get a 404.

use axum::{
    extract::{Path, State},
    http::{StatusCode, Uri},
    response::Json,
};
use std::sync::Arc;

use autoreact_core::{ControlError, Reply};

use super::SharedState;

fn respond(result: Result<Reply, ControlError>) -> Json<Reply> {
    Json(result.unwrap_or_else(ControlError::into_reply))
}

/// Handler for GET /
pub async fn home(State(state): State<Arc<SharedState>>) -> Json<Reply> {
    Json(state.service.home())
}

/// Handler for GET /login/start/{api_id}/{api_hash}/{phone}
pub async fn login_start(
    State(state): State<Arc<SharedState>>,
    Path((api_id, api_hash, phone)): Path<(String, String, String)>,
) -> Json<Reply> {
    log::debug!("HTTP login start for {}", phone);
    respond(state.service.login_start(&api_id, &api_hash, &phone).await)
}

/// Handler for GET /login/otp/{phone}/{otp}
pub async fn login_otp(
    State(state): State<Arc<SharedState>>,
    Path((phone, otp)): Path<(String, String)>,
) -> Json<Reply> {
    log::debug!("HTTP login code for {}", phone);
    respond(state.service.login_otp(&phone, &otp).await)
}

/// Handler for GET /login/password/{phone}/{password}
pub async fn login_password(
    State(state): State<Arc<SharedState>>,
    Path((phone, password)): Path<(String, String)>,
) -> Json<Reply> {
    log::debug!("HTTP login password for {}", phone);
    respond(state.service.login_password(&phone, &password).await)
}

/// Handler for GET /react/start/{phone}/{group_id}/{emoji}
pub async fn react_start(
    State(state): State<Arc<SharedState>>,
    Path((phone, group_id, emoji)): Path<(String, String, String)>,
) -> Json<Reply> {
    log::debug!("HTTP reaction start for {} in {}", phone, group_id);
    respond(state.service.react_start(&phone, &group_id, &emoji).await)
}

/// Handler for GET /react/stop/{phone}
pub async fn react_stop(
    State(state): State<Arc<SharedState>>,
    Path(phone): Path<String>,
) -> Json<Reply> {
    log::debug!("HTTP reaction stop for {}", phone);
    respond(state.service.react_stop(&phone).await)
}

/// Handler for GET /react/status/{phone}
pub async fn react_status(
    State(state): State<Arc<SharedState>>,
    Path(phone): Path<String>,
) -> Json<Reply> {
    Json(state.service.react_status(&phone))
}

pub async fn not_found(uri: Uri) -> (StatusCode, Json<Reply>) {
    log::debug!("HTTP unknown path {}", uri.path());
    (
        StatusCode::NOT_FOUND,
        Json(Reply::error(format!("Not found: {}", uri.path()))),
    )
}
