use axum::{
    extract::State,
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use crate::auth::middleware::JwtSecret;
use crate::chat::{messages, presence, reactions};
use crate::notifications::routes as notification_routes;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    State(state): State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    // Authenticated routes (Claims extractor validates the bearer token)
    let message_routes = Router::new()
        .route("/api/presence", get(presence::get_presence))
        .route("/api/messages", post(messages::send_message))
        .route(
            "/api/messages/conversation/{user_id}",
            get(messages::get_conversation),
        )
        .route("/api/messages/last/{user_id}", get(messages::get_last_message))
        .route(
            "/api/messages/{message_id}",
            delete(messages::delete_message),
        )
        .route(
            "/api/messages/{message_id}/react",
            put(reactions::react_rest),
        );

    let notification_api = Router::new()
        .route(
            "/api/notifications",
            get(notification_routes::list_notifications)
                .post(notification_routes::create_notification)
                .delete(notification_routes::delete_all),
        )
        .route("/api/notifications/unread", get(notification_routes::list_unread))
        .route(
            "/api/notifications/unread-count",
            get(notification_routes::unread_count),
        )
        .route(
            "/api/notifications/read-all",
            put(notification_routes::mark_all_read),
        )
        .route(
            "/api/notifications/{id}/read",
            put(notification_routes::mark_read),
        )
        .route(
            "/api/notifications/{id}",
            delete(notification_routes::delete_notification),
        );

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(message_routes)
        .merge(notification_api)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
