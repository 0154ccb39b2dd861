//! REST API for cards and cast receivers.
//!
//! Every response carries `Cache-Control: no-cache`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{FromRef, Path, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    routing::get,
};
use rfidcontrol::{
    Card, CardRegistry, CastStatus, ClientAction, ClientSummary, ControlError, ControlReply,
    SessionManager,
};
use serde::{Deserialize, Serialize};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, error, info, warn};

use crate::logs::{LogState, log_setup_get, log_setup_post};

#[derive(Clone)]
pub struct ApiState {
    pub cards: Arc<dyn CardRegistry>,
    pub session: Arc<SessionManager>,
    pub discovery_duration: Duration,
    pub logs: LogState,
}

impl FromRef<ApiState> for LogState {
    fn from_ref(state: &ApiState) -> Self {
        state.logs.clone()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/cards", get(list_cards).post(add_card))
        .route(
            "/api/cards/{id}",
            get(get_card).delete(delete_card).post(play_card),
        )
        .route(
            "/api/casts",
            get(list_casts).post(discover_casts).put(control_cast),
        )
        .route("/api/status", get(cast_status))
        .route("/api/log_setup", get(log_setup_get).post(log_setup_post))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ))
        .with_state(state)
}

/// GET /api/cards
async fn list_cards(State(state): State<ApiState>) -> Json<HashMap<String, Card>> {
    Json(state.cards.list())
}

/// POST /api/cards - adds or replaces a card, returns every card
async fn add_card(
    State(state): State<ApiState>,
    payload: Result<Json<Card>, JsonRejection>,
) -> Result<Json<HashMap<String, Card>>, ApiError> {
    let Json(card) = payload.map_err(|e| {
        warn!(error = %e, "Rejected card payload");
        api_error(StatusCode::BAD_REQUEST, e.body_text())
    })?;
    if card.id.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "card id is empty"));
    }

    info!(card_id = %card.id, name = %card.name, "Card stored");
    state
        .cards
        .add(card)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(Json(state.cards.list()))
}

/// GET /api/cards/{id}
async fn get_card(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Card>, ApiError> {
    state
        .cards
        .get(&id)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("card {id} not found")))
}

/// DELETE /api/cards/{id} - returns the remaining cards
async fn delete_card(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<HashMap<String, Card>>, ApiError> {
    let removed = state
        .cards
        .remove(&id)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    debug!(card_id = %id, removed, "Card delete");
    Ok(Json(state.cards.list()))
}

/// POST /api/cards/{id} - plays the card on its receiver in the background
async fn play_card(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let card = state
        .cards
        .get(&id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("card {id} not found")))?;

    let session = state.session.clone();
    tokio::spawn(async move {
        if let Err(e) = session.play_card(&card).await {
            error!(card = %card.name, error = %e, "Play request failed");
        }
    });
    Ok(StatusCode::ACCEPTED)
}

/// GET /api/casts
async fn list_casts(State(state): State<ApiState>) -> Json<Vec<ClientSummary>> {
    Json(state.session.clients().await)
}

/// POST /api/casts - starts a discovery sweep
async fn discover_casts(State(state): State<ApiState>) -> StatusCode {
    if !state.session.start_discovery(state.discovery_duration) {
        debug!("Discovery request ignored, sweep in progress");
    }
    StatusCode::ACCEPTED
}

/// PUT /api/casts - transport and volume control of the live session
async fn control_cast(
    State(state): State<ApiState>,
    payload: Result<Json<ClientAction>, JsonRejection>,
) -> Result<(StatusCode, Json<ControlReply>), ApiError> {
    let Json(action) =
        payload.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;

    match state.session.client_control(&action).await {
        Ok(reply) => Ok((StatusCode::ACCEPTED, Json(reply))),
        Err(e @ ControlError::Validation(_, _)) => Err(api_error(StatusCode::BAD_REQUEST, e)),
        Err(e) => {
            warn!(action = %action.action, error = %e, "Cast control failed");
            Err(api_error(StatusCode::NOT_FOUND, e))
        }
    }
}

/// GET /api/status
async fn cast_status(State(state): State<ApiState>) -> Json<CastStatus> {
    Json(state.session.cast_status().await)
}
