//! # storefront-payments
//!
//! Checkout sessions, payment ledger and asynchronous provider reconciliation
//! for a digital-goods storefront.
//!
//! ## Payment Flow
//!
//! Payments are initiated synchronously and confirmed later by the provider:
//!
//! ```text
//! ┌──────────┐  init   ┌──────────┐  submit  ┌──────────┐  C2B   ┌──────────┐
//! │  Buyer   │────────▶│ Session  │─────────▶│  Sale    │───────▶│ Provider │
//! │          │         │ (token)  │          │ Pending  │        │          │
//! └──────────┘         └──────────┘          └──────────┘        └────┬─────┘
//!                            ▲                     │                  │
//!                            │ mark used           │ settle / fail    │ webhook
//!                            │                     ▼                  │
//!                      ┌─────┴──────────────────────────────┐         │
//!                      │        ReconciliationEngine        │◀────────┘
//!                      └────────────────────────────────────┘
//! ```
//!
//! The provider may deliver the same notification more than once and in any
//! order. Every ledger record changes status at most once, out of `Pending`,
//! through a conditional store write; everything else (redeliveries, late
//! contradicting signals) is acknowledged without effect.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use storefront_payments::*;
//!
//! let ledger = Arc::new(MemoryLedgerStore::new());
//! let sessions = Arc::new(MemorySessionStore::new());
//! let catalog = Arc::new(MemoryCatalog::new());
//! let gateway = Arc::new(DebitoGateway::from_env()?);
//!
//! let engine = Arc::new(ReconciliationEngine::new(
//!     ledger.clone(),
//!     sessions.clone(),
//!     catalog.clone(),
//!     Arc::new(NoopNotifier),
//! ));
//! let checkout = CheckoutService::new(sessions, catalog, ledger, gateway, engine.clone());
//!
//! let session = checkout.init_checkout("101").await?;
//! // ... buyer submits, provider calls back:
//! engine.handle(&serde_json::json!({ "reference": "ref-1", "status": "paid" })).await?;
//! ```

mod catalog;
mod checkout;
mod error;
mod fields;
mod gateway;
mod ledger;
mod notify;
mod payout;
mod reporting;
mod session;
mod signal;
mod webhook;

pub use catalog::{Catalog, MemoryCatalog, Product, is_mock_product, mock_product};
pub use checkout::{CheckoutService, CheckoutView, PaymentAccepted, PaymentSubmission, SaleView};
pub use error::{PaymentError, Result};
pub use fields::{FieldPath, first_match};
pub use gateway::{
    Channel, CustomerInfo, DebitoGateway, GatewayConfig, GatewayFailure, GatewayRequest,
    PaymentGateway, PaymentResult, PhoneFormat, normalize_international, normalize_local,
};
pub use ledger::{
    Counterparty, LedgerRecord, LedgerStore, Lifecycle, MemoryLedgerStore, RecordKind,
    RecordStatus, Sale, TransitionOutcome, Withdrawal, settled_total,
};
pub use notify::{HttpNotifier, NoopNotifier, NotifierConfig, SaleNotifier};
pub use payout::{PayoutService, WithdrawalHistory, WithdrawalRequest};
pub use reporting::{DashboardSummary, RevenueBucket, current_balance};
pub use session::{CheckoutSession, MemorySessionStore, SessionPolicy, SessionStore, SessionToken};
pub use signal::{FAILURE_SYNONYMS, ProviderSignal, SUCCESS_SYNONYMS};
pub use webhook::{
    Notification, REFERENCE_RULES, ReconcileOutcome, ReconciliationEngine, ResolvedRecord,
    STATUS_RULES,
};
