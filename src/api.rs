//! HTTP bridge for the messaging gateway.
//!
//! Used by the binary and by integration tests. Create with [`create_router`].
//! Uses Extension for state so the router is `Router<()>` and works with `into_make_service()`.
//!
//! Rejected intents and malformed bodies answer `400` with
//! `{"error": code, "message": text}`; rejected intents also carry the
//! `notifications` to deliver.

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::warn;
use std::sync::Arc;

use crate::persistence::FilePersistence;
use crate::{Desk, Notification, UserId, UserIntent};

/// Shared app state: one desk per process, optional state file.
#[derive(Clone)]
pub struct AppState {
    pub(crate) desk: Arc<Desk>,
    pub(crate) persistence: Option<FilePersistence>,
}

impl AppState {
    pub fn new(desk: Arc<Desk>, persistence: Option<FilePersistence>) -> Self {
        Self { desk, persistence }
    }

    /// Writes the current desk state, or drops the file once no user is left.
    /// Runs on the blocking pool; the snapshot is taken under the store's write lock.
    async fn persist(&self) {
        let Some(store) = self.persistence.clone() else {
            return;
        };
        let desk = Arc::clone(&self.desk);
        let path = store.path().display().to_string();
        let result = tokio::task::spawn_blocking(move || {
            store.sync(|| (!desk.users().is_empty()).then(|| desk.snapshot()))
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("state save failed path={} error={}", path, e),
            Err(e) => warn!("state save task failed path={} error={}", path, e),
        }
    }
}

/// Builds the router around an existing desk. Returns `Router<()>` so you can call `.into_make_service()` for `axum::serve`.
pub fn create_router(state: AppState) -> Router<()> {
    Router::new()
        .route("/health", get(health))
        .route("/intents", post(handle_intent))
        .route("/users/unreachable", post(user_unreachable))
        .route("/lifecycle/restart", post(restart_broadcast))
        .route("/snapshot", get(snapshot))
        .layer(Extension(state))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[derive(serde::Serialize)]
struct NotificationsOut {
    notifications: Vec<Notification>,
}

#[derive(serde::Serialize)]
struct ErrorOut {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    notifications: Vec<Notification>,
}

fn bad_request(error: impl Into<String>, message: impl Into<String>, notifications: Vec<Notification>) -> Response {
    let body = ErrorOut {
        error: error.into(),
        message: message.into(),
        notifications,
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

fn malformed(rejection: JsonRejection) -> Response {
    bad_request("invalid_request", rejection.body_text(), Vec::new())
}

async fn handle_intent(
    Extension(state): Extension<AppState>,
    payload: Result<Json<UserIntent>, JsonRejection>,
) -> Response {
    let Json(intent) = match payload {
        Ok(intent) => intent,
        Err(rejection) => return malformed(rejection),
    };
    let notifications = state.desk.handle(intent);
    // Rejected intents can still register the user or reset a pending question.
    state.persist().await;
    let rejected = notifications
        .iter()
        .find_map(|n| n.error.clone().map(|code| (code, n.text.clone())));
    match rejected {
        Some((code, message)) => bad_request(code, message, notifications),
        None => (StatusCode::OK, Json(NotificationsOut { notifications })).into_response(),
    }
}

#[derive(serde::Deserialize)]
struct UnreachableRequest {
    user_id: UserId,
}

async fn user_unreachable(
    Extension(state): Extension<AppState>,
    payload: Result<Json<UnreachableRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => return malformed(rejection),
    };
    let removal = state.desk.remove_unreachable(body.user_id);
    state.persist().await;
    (StatusCode::OK, Json(removal)).into_response()
}

async fn restart_broadcast(Extension(state): Extension<AppState>) -> Response {
    let notifications = state.desk.restart_notifications();
    (StatusCode::OK, Json(NotificationsOut { notifications })).into_response()
}

async fn snapshot(Extension(state): Extension<AppState>) -> Response {
    (StatusCode::OK, Json(state.desk.snapshot())).into_response()
}
