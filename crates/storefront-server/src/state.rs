//! Application State

use std::sync::Arc;

use storefront_payments::{
    Catalog, CheckoutService, LedgerStore, PaymentGateway, PayoutService, ReconciliationEngine,
    SaleNotifier, SessionPolicy, SessionStore,
};

/// Storage and outbound collaborators the services are built on
pub struct Backends {
    pub ledger: Arc<dyn LedgerStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub catalog: Arc<dyn Catalog>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn SaleNotifier>,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Buyer checkout flow
    pub checkout: Arc<CheckoutService>,

    /// Merchant withdrawals
    pub payouts: Arc<PayoutService>,

    /// Webhook reconciliation
    pub engine: Arc<ReconciliationEngine>,

    pub catalog: Arc<dyn Catalog>,
    pub ledger: Arc<dyn LedgerStore>,
    pub gateway: Arc<dyn PaymentGateway>,
}

impl AppState {
    pub fn new(backends: Backends, policy: SessionPolicy, callback_url: Option<String>) -> Self {
        let Backends {
            ledger,
            sessions,
            catalog,
            gateway,
            notifier,
        } = backends;

        let engine = Arc::new(ReconciliationEngine::new(
            ledger.clone(),
            sessions.clone(),
            catalog.clone(),
            notifier,
        ));

        let mut checkout = CheckoutService::new(
            sessions,
            catalog.clone(),
            ledger.clone(),
            gateway.clone(),
            engine.clone(),
        )
        .with_policy(policy);
        let mut payouts = PayoutService::new(ledger.clone(), gateway.clone());
        if let Some(url) = callback_url {
            checkout = checkout.with_callback_url(url.clone());
            payouts = payouts.with_callback_url(url);
        }

        Self {
            checkout: Arc::new(checkout),
            payouts: Arc::new(payouts),
            engine,
            catalog,
            ledger,
            gateway,
        }
    }
}
