//! Storefront HTTP Server
//!
//! Axum router exposing the checkout flow, merchant withdrawals, reporting
//! and the provider webhook over `storefront-payments`.

mod config;
mod handlers;
mod state;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use config::ServerConfig;
pub use handlers::ErrorResponse;
pub use state::{AppState, Backends};

use crate::handlers::{
    checkout_status, dashboard, health_check, init_checkout, list_products, list_withdrawals,
    process_payment, process_withdrawal, provider_webhook, show_checkout, thank_you,
};

/// Build the application router
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & catalog
        .route("/health", get(health_check))
        .route("/store", get(list_products))
        // Buyer checkout
        .route("/checkout/init/{product_id}", get(init_checkout))
        .route("/c/{token}", get(show_checkout))
        .route("/checkout/process", post(process_payment))
        .route("/checkout/status/{sale_id}", get(checkout_status))
        .route("/thank-you/{sale_id}", get(thank_you))
        // Merchant
        .route("/withdrawals", get(list_withdrawals))
        .route("/withdrawals/process", post(process_withdrawal))
        .route("/dashboard", get(dashboard))
        // Provider
        .route("/webhooks/provider", post(provider_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
