use axum::{
    http::{header, HeaderName, Method},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod actor;
pub mod audit;
pub mod bookings;
pub mod error;
pub mod state;
pub mod worker;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::USER_AGENT,
            HeaderName::from_static(actor::IDEMPOTENCY_KEY_HEADER),
            HeaderName::from_static(actor::ACTOR_ID_HEADER),
            HeaderName::from_static(actor::ACTOR_NAME_HEADER),
            HeaderName::from_static(actor::ACTOR_ROLE_HEADER),
        ]);

    Router::new()
        .merge(bookings::routes())
        .merge(audit::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
