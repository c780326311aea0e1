mod http;
mod ws;

use axum::Router;
use axum::routing::get;
use tokio_util::sync::CancellationToken;

use bridge_engine::SessionContext;

#[derive(Clone)]
struct AppState {
    ctx: SessionContext,
}

/// Routes of the gateway: the bridge endpoint plus operational endpoints.
pub fn router(ctx: SessionContext) -> Router {
    let state = AppState { ctx };
    Router::new()
        .route("/ws/{client_id}/{topic}/", get(ws::handle_ws))
        .route("/ws/{client_id}/{topic}", get(ws::handle_ws))
        .route("/health", get(http::handle_health))
        .route("/api/sessions", get(http::handle_list_sessions))
        .with_state(state)
}

/// WebSocket gateway. Returns once `shutdown` fires and the listener stops.
///
/// Live sessions are not awaited here: their tokens are children of
/// `ctx.shutdown`, so they tear down on their own.
pub async fn run(bind: &str, ctx: SessionContext, shutdown: CancellationToken) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| format!("bind {bind}: {e}"))?;
    serve(listener, ctx, shutdown).await
}

/// Serve on an already bound listener.
pub async fn serve(
    listener: tokio::net::TcpListener,
    ctx: SessionContext,
    shutdown: CancellationToken,
) -> Result<(), String> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "bridge gateway listening");
    }

    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| format!("axum serve: {e}"))?;

    Ok(())
}
