use axum::http::HeaderValue;
use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod attachments;
pub mod auth;
pub mod cards;
pub mod fulfillment;
pub mod groups;
pub mod health;
pub mod overrides;
pub mod settings;
pub mod swaps;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        let allow_origin = AllowOrigin::list(headers);

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/me", get(auth::me));

    let users_routes = Router::new()
        .route("/", get(auth::list_users).post(auth::create_user))
        .route("/:id", delete(auth::delete_user));

    let groups_routes = Router::new()
        .route("/", get(groups::list_groups).post(groups::create_group))
        .route(
            "/:id",
            get(groups::get_group)
                .patch(groups::update_group)
                .delete(groups::delete_group),
        )
        .route(
            "/:id/template",
            get(groups::get_template).put(groups::put_template),
        )
        .route(
            "/:id/attachments",
            get(attachments::list_attachments).post(attachments::create_attachment),
        )
        .route("/:id/claims", get(attachments::list_claims))
        .route("/:id/inventory-check", get(attachments::inventory_check))
        .route(
            "/:id/fulfillment",
            get(fulfillment::list_runs).post(fulfillment::trigger_run),
        );

    let claims_routes = Router::new()
        .route("/", post(attachments::create_claim))
        .route("/:id", delete(attachments::release_claim));

    let attachments_routes =
        Router::new().route("/:id", delete(attachments::delete_attachment));

    let swaps_routes = Router::new()
        .route("/", get(swaps::list_preferences).post(swaps::create_preference))
        .route("/:id", delete(swaps::delete_preference));

    let overrides_routes = Router::new()
        .route(
            "/",
            get(overrides::list_overrides).post(overrides::create_override),
        )
        .route("/:id", delete(overrides::remove_override));

    let cards_routes = Router::new()
        .route("/", get(cards::list_cards).post(cards::send_card))
        .route(
            "/:id",
            get(cards::get_card)
                .patch(cards::update_card)
                .delete(cards::delete_card),
        )
        .route("/:id/pdf", get(cards::card_pdf));

    let fulfillment_routes = Router::new()
        .route("/:run_id", get(fulfillment::get_run))
        .route("/:run_id/:format", get(fulfillment::download_artifact));

    let settings_routes = Router::new()
        .route("/", get(settings::list_settings))
        .route("/:key", put(settings::put_setting));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/users", users_routes)
        .nest("/api/groups", groups_routes)
        .nest("/api/claims", claims_routes)
        .nest("/api/attachments", attachments_routes)
        .nest("/api/swaps", swaps_routes)
        .nest("/api/overrides", overrides_routes)
        .nest("/api/cards", cards_routes)
        .nest("/api/fulfillment", fulfillment_routes)
        .nest("/api/settings", settings_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
}
