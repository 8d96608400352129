use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer};
use crate::handlers::{discounts, health_check, holds, resale, reservations};
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/holds", post(holds::acquire))
        .route("/holds/:id", delete(holds::release))
        .route("/holds/:id/extend", post(holds::extend))
        .route("/holds/:id/confirm", post(holds::confirm))
        .route("/seat-reservations", post(reservations::reserve))
        .route(
            "/seat-reservations/:id/toggle-status",
            put(reservations::toggle_status),
        )
        .route("/seat-reservations/:id/rebind", put(reservations::rebind))
        .route("/discounts/validate", post(discounts::validate))
        .route("/resale", post(resale::list))
        .route("/resale/:id/buy", put(resale::buy))
        .route("/resale/:id", delete(resale::cancel))
        .layer(create_security_headers_layer())
        .layer(create_cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
