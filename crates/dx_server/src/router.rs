//! Router construction.
//!
//! Every subscription route runs the authorization middleware with that
//! route group's `EndpointPolicy`; the policy extension is layered outside
//! the middleware so the chain sees it. Health stays public.

use std::sync::Arc;

use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Extension, Router,
};
use tower_http::trace::TraceLayer;

use dx_core::auth::{AuthPipeline, EndpointPolicy};
use dx_core::service::SubscriptionService;

use crate::handlers;
use crate::middleware::auth::require_authorization;

pub const NGSILD_BASE: &str = "/ngsi-ld/v1";

/// Build the full axum router with all routes and middleware.
pub fn build_router(
    service: Arc<dyn SubscriptionService>,
    pipeline: Arc<AuthPipeline>,
) -> Router {
    let subscriptions = Router::new()
        .route(
            &format!("{NGSILD_BASE}/subscription"),
            post(handlers::subscriptions::create_subscription)
                .get(handlers::subscriptions::list_subscriptions),
        )
        .route(
            &format!("{NGSILD_BASE}/subscription/:userid/:alias"),
            get(handlers::subscriptions::get_subscription)
                .put(handlers::subscriptions::update_subscription)
                .patch(handlers::subscriptions::append_subscription)
                .delete(handlers::subscriptions::delete_subscription),
        )
        .layer(axum_mw::from_fn(require_authorization))
        .layer(Extension(EndpointPolicy::subscription()));

    let credentials = Router::new()
        .route(
            &format!("{NGSILD_BASE}/user/resetPassword"),
            post(handlers::subscriptions::reset_password),
        )
        .layer(axum_mw::from_fn(require_authorization))
        .layer(Extension(EndpointPolicy::credential_reset()));

    let public = Router::new().route("/health", get(handlers::health::health));

    public
        .merge(subscriptions)
        .merge(credentials)
        .layer(Extension(service))
        .layer(Extension(pipeline))
        .layer(TraceLayer::new_for_http())
}
