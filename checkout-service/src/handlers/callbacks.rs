//! Browser-facing gateway callbacks. Both always answer with a 303 redirect.

use axum::{extract::State, response::Redirect};

use crate::startup::AppState;
use crate::utils::CallbackParams;

pub async fn esewa_success(
    State(state): State<AppState>,
    CallbackParams(payload): CallbackParams,
) -> Redirect {
    let outcome = state.reconciler.on_success(&payload).await;
    Redirect::to(&outcome.redirect_url)
}

pub async fn esewa_failure(
    State(state): State<AppState>,
    CallbackParams(payload): CallbackParams,
) -> Redirect {
    let outcome = state.reconciler.on_failure(&payload).await;
    Redirect::to(&outcome.redirect_url)
}
