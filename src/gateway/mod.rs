pub mod handlers;
pub mod identity;
pub mod state;

use anyhow::Context;
use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use state::AppState;

/// Build the HTTP router; everything under `/api/v1` requires a Bearer token
pub fn router(state: Arc<AppState>) -> Router {
    let protected_routes = Router::new()
        .route("/products", post(handlers::register_product))
        .route("/products/batch", post(handlers::register_batch))
        .route("/products/{serial}", get(handlers::get_product))
        .route("/products/{serial}/history", get(handlers::get_history))
        .route("/products/{serial}/transfer", post(handlers::transfer_product))
        .route("/me/products", get(handlers::my_products))
        .route("/admin/reconciliation", get(handlers::list_reconciliation))
        .route(
            "/admin/reconciliation/{task_id}",
            post(handlers::reconcile_task),
        )
        .route(
            "/admin/reconciliation/{task_id}/dismiss",
            post(handlers::dismiss_task),
        )
        .layer(from_fn_with_state(
            state.clone(),
            identity::identity_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", protected_routes)
        .with_state(state)
}

/// Start HTTP Gateway server
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = router(state);

    // Bind address
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {} (port already in use?)", addr))?;

    info!("Gateway listening on http://{}", addr);
    info!("Custody API: /api/v1/* (Bearer token required)");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
