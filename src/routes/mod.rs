use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod assistant;
pub mod auth;
pub mod businesses;
pub mod chat;
pub mod health;

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn create_router(state: AppState) -> Router<()> {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        tracing::warn!(origin = value, "ignoring invalid CORS allowed origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me).patch(auth::update_me))
        .route("/password/change", post(auth::change_password));

    let business_routes = Router::new()
        .route(
            "/",
            get(businesses::list_businesses).post(businesses::create_business),
        )
        .route(
            "/:id",
            get(businesses::get_business)
                .patch(businesses::update_business)
                .delete(businesses::delete_business),
        )
        .route("/:id/verify", post(businesses::verify_business));

    let chat_routes = Router::new()
        .route(
            "/sessions",
            get(chat::list_sessions).post(chat::create_session),
        )
        .route(
            "/sessions/:id",
            get(chat::get_session)
                .patch(chat::update_session)
                .delete(chat::delete_session),
        )
        .route(
            "/sessions/:id/messages",
            get(chat::list_messages).post(chat::post_message),
        )
        .route("/sessions/:id/ask", post(chat::ask_in_session));

    let assistant_routes = Router::new().route("/ask", post(assistant::ask));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/businesses", business_routes)
        .nest("/api/chat", chat_routes)
        .nest("/api/assistant", assistant_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
