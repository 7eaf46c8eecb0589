//! Storefront HTTP Server
//!
//! Wires the in-memory stores, the Debito gateway and the settlement
//! notifier into the axum router.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_payments::{
    DebitoGateway, GatewayConfig, HttpNotifier, MemoryCatalog, MemoryLedgerStore,
    MemorySessionStore, NotifierConfig, SessionPolicy,
};
use storefront_server::{AppState, Backends, ServerConfig, app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();

    // Gateway
    let mut gateway_config = GatewayConfig::from_env();
    if gateway_config.callback_url.is_none() {
        gateway_config.callback_url = config.callback_url();
    }
    let gateway = DebitoGateway::new(gateway_config)?;
    if gateway.config().is_configured() {
        tracing::info!(base_url = %gateway.config().base_url, "✓ Payment gateway configured");
    } else {
        tracing::warn!("⚠ Payment gateway not configured - payments will fail");
        tracing::warn!("  Set DEBITO_TOKEN and DEBITO_WALLET_ID_* in .env");
    }
    match gateway.config().callback_url.as_deref() {
        Some(url) => tracing::info!(callback_url = url, "Provider callbacks"),
        None => tracing::warn!("⚠ No callback URL - set PUBLIC_BASE_URL or DEBITO_CALLBACK_URL"),
    }

    let policy = SessionPolicy::from_env();
    tracing::info!(
        ttl_minutes = policy.ttl.num_minutes(),
        enforce_expiry = policy.enforce_on_display,
        "Checkout sessions"
    );

    // Build application state
    let callback_url = gateway.config().callback_url.clone();
    let state = AppState::new(
        Backends {
            ledger: Arc::new(MemoryLedgerStore::new()),
            sessions: Arc::new(MemorySessionStore::new()),
            catalog: Arc::new(MemoryCatalog::new()),
            gateway: Arc::new(gateway),
            notifier: Arc::new(HttpNotifier::new(NotifierConfig::from_env())?),
        },
        policy,
        callback_url,
    );

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 storefront server running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                     - Health check");
    tracing::info!("  GET  /store                      - Product catalog");
    tracing::info!("  GET  /checkout/init/{{product}}    - Start checkout");
    tracing::info!("  GET  /c/{{token}}                  - Checkout page");
    tracing::info!("  POST /checkout/process           - Submit payment");
    tracing::info!("  GET  /checkout/status/{{sale}}     - Poll provider");
    tracing::info!("  GET  /thank-you/{{sale}}           - Sale status");
    tracing::info!("  POST /withdrawals/process        - Withdraw balance");
    tracing::info!("  GET  /dashboard                  - Revenue summary");
    tracing::info!("  POST /webhooks/provider          - Provider webhook");
    tracing::info!("");

    axum::serve(listener, app(state)).await?;

    Ok(())
}
