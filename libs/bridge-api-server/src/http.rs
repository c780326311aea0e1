use axum::extract::State;
use axum::response::IntoResponse;

use super::AppState;

// ═══════════════════════════════════════════════════════════════
//  REST: GET /health
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_health() -> &'static str {
    "ok"
}

// ═══════════════════════════════════════════════════════════════
//  REST: GET /api/sessions
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.ctx.registry.list())
}
