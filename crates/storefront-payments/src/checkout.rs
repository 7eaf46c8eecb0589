//! Buyer Checkout Flow
//!
//! Session creation, checkout display, payment submission and the
//! thank-you/status views. Payment submission only *initiates* a sale; the
//! sale settles later through [`ReconciliationEngine`], either from a webhook
//! or from [`CheckoutService::refresh_sale`] polling the provider.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, Product};
use crate::error::{PaymentError, Result};
use crate::gateway::{Channel, CustomerInfo, GatewayRequest, PaymentGateway};
use crate::ledger::{Counterparty, LedgerStore, RecordStatus, Sale};
use crate::session::{CheckoutSession, SessionPolicy, SessionStore, SessionToken};
use crate::signal::ProviderSignal;
use crate::webhook::{ReconcileOutcome, ReconciliationEngine};

/// Fresh tokens tried when the store reports a collision
const SESSION_ATTEMPTS: usize = 3;

/// A payment as submitted from the checkout page
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentSubmission {
    pub amount: Decimal,
    pub phone: String,
    pub channel: Channel,
    pub name: Option<String>,
    pub email: Option<String>,
    pub product_id: Option<String>,
    pub session_token: Option<SessionToken>,
}

/// What the checkout page renders
#[derive(Clone, Debug, Serialize)]
pub struct CheckoutView {
    pub session: CheckoutSession,
    pub product: Product,
}

/// Payment initiated; the buyer confirms on their device
#[derive(Clone, Debug, Serialize)]
pub struct PaymentAccepted {
    pub sale_id: String,
    pub external_reference: Option<String>,
    pub redirect: String,
}

/// Thank-you page model; tolerates a sale still pending
#[derive(Clone, Debug, Serialize)]
pub struct SaleView {
    pub sale_id: String,
    pub status: RecordStatus,
    pub amount: Decimal,
    pub product_name: String,
    /// Only present once the sale settled
    pub content_link: Option<String>,
}

/// Checkout service
pub struct CheckoutService {
    sessions: Arc<dyn SessionStore>,
    catalog: Arc<dyn Catalog>,
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    engine: Arc<ReconciliationEngine>,
    policy: SessionPolicy,
    callback_url: Option<String>,
}

impl CheckoutService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        catalog: Arc<dyn Catalog>,
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        engine: Arc<ReconciliationEngine>,
    ) -> Self {
        Self {
            sessions,
            catalog,
            ledger,
            gateway,
            engine,
            policy: SessionPolicy::default(),
            callback_url: None,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: SessionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Callback handed to the provider with each payment
    #[must_use]
    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    /// Open a checkout session for a product
    pub async fn init_checkout(&self, product_id: &str) -> Result<CheckoutSession> {
        if self.catalog.get(product_id).await?.is_none() {
            return Err(PaymentError::ProductNotFound(product_id.to_string()));
        }

        let mut attempt = 1;
        loop {
            let session = CheckoutSession::new(product_id, self.policy.ttl);
            match self.sessions.insert(&session).await {
                Ok(()) => {
                    tracing::info!(
                        product_id,
                        is_mock = session.is_mock,
                        expires_at = %session.expires_at,
                        "Checkout session created"
                    );
                    return Ok(session);
                }
                Err(PaymentError::Conflict(reason)) if attempt < SESSION_ATTEMPTS => {
                    tracing::warn!(attempt, reason = %reason, "Checkout token collision, regenerating");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Session and product for the checkout page
    pub async fn load_checkout(&self, token: &SessionToken) -> Result<CheckoutView> {
        let session = self.sessions.get_active(token).await?;
        if self.policy.enforce_on_display && session.is_expired_at(Utc::now()) {
            return Err(PaymentError::SessionExpired(token.to_string()));
        }

        let product = self
            .catalog
            .get(&session.product_id)
            .await?
            .ok_or_else(|| PaymentError::ProductNotFound(session.product_id.clone()))?;

        Ok(CheckoutView { session, product })
    }

    /// Initiate a payment and record the sale.
    ///
    /// The session stays unused until the sale settles, so a buyer whose
    /// first attempt fails can retry from the same checkout. A session with a
    /// pending or settled sale accepts no further submissions.
    pub async fn process_payment(&self, submission: PaymentSubmission) -> Result<PaymentAccepted> {
        if submission.amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidAmount(format!(
                "{} must be greater than zero",
                submission.amount
            )));
        }

        let mut product_id = submission.product_id.clone().filter(|id| !id.is_empty());
        if let Some(token) = &submission.session_token {
            let session = self.sessions.get_active(token).await?;
            if product_id.as_deref().is_some_and(|id| id != session.product_id) {
                tracing::warn!(
                    token = %token,
                    submitted = ?product_id,
                    session_product = %session.product_id,
                    "Submitted product differs from session, using session product"
                );
            }
            product_id = Some(session.product_id);

            if let Some(open) = self.ledger.open_sale_for_session(token).await? {
                tracing::warn!(
                    token = %token,
                    sale_id = %open.id,
                    status = %open.status(),
                    "Checkout already has an open sale, rejecting submission"
                );
                return Err(match open.status() {
                    RecordStatus::Settled => PaymentError::SessionAlreadyUsed(token.to_string()),
                    _ => PaymentError::Conflict(format!(
                        "payment {} already in progress for this checkout",
                        open.id
                    )),
                });
            }
        }

        let product = match &product_id {
            Some(id) => Some(
                self.catalog
                    .get(id)
                    .await?
                    .ok_or_else(|| PaymentError::ProductNotFound(id.clone()))?,
            ),
            None => None,
        };
        if let Some(product) = &product {
            if submission.amount != product.price {
                return Err(PaymentError::AmountMismatch {
                    submitted: submission.amount,
                    expected: product.price,
                });
            }
        }

        let request = GatewayRequest {
            reference: product.as_ref().map(|p| p.name.clone()),
            callback_url: self.callback_url.clone(),
            customer: Some(CustomerInfo {
                name: submission.name.clone(),
                email: submission.email.clone(),
                phone: Some(submission.phone.clone()),
            }),
            ..GatewayRequest::new(submission.channel, submission.amount, submission.phone.clone())
        };
        let result = self.gateway.initiate_payment(&request).await;

        let mut sale = if result.success {
            Sale::pending(
                submission.amount,
                submission.channel,
                result.external_reference.clone(),
            )
        } else {
            Sale::failed(submission.amount, submission.channel, result.error_text())
        };
        sale.customer = Counterparty {
            name: submission.name.unwrap_or_default(),
            email: submission.email,
            phone: Some(submission.phone),
        };
        sale.product_id = product_id;
        if let Some(product) = &product {
            sale.product_name.clone_from(&product.name);
        }
        sale.session_token = submission.session_token;

        if let Err(e) = self.ledger.insert_sale(&sale).await {
            if result.success {
                tracing::error!(
                    reference = ?sale.external_reference,
                    amount = %sale.amount,
                    error = %e,
                    "Provider payment initiated but sale not recorded"
                );
            }
            return Err(e);
        }

        if !result.success {
            tracing::warn!(
                sale_id = %sale.id,
                channel = %sale.channel,
                error = result.error_text(),
                "Payment initiation failed, recorded as failed sale"
            );
            return Err(result.to_error());
        }

        if sale.external_reference.is_none() {
            tracing::warn!(sale_id = %sale.id, "Provider returned no reference, sale cannot be reconciled");
        }
        tracing::info!(
            sale_id = %sale.id,
            amount = %sale.amount,
            channel = %sale.channel,
            reference = ?sale.external_reference,
            "Sale created, awaiting provider confirmation"
        );

        Ok(PaymentAccepted {
            redirect: format!("/thank-you/{}", sale.id),
            sale_id: sale.id,
            external_reference: sale.external_reference,
        })
    }

    /// Current sale state for the thank-you page
    pub async fn sale_status(&self, sale_id: &str) -> Result<SaleView> {
        let sale = self
            .ledger
            .get_sale(sale_id)
            .await?
            .ok_or_else(|| PaymentError::RecordNotFound(sale_id.to_string()))?;

        let content_link = if sale.status() == RecordStatus::Settled {
            match sale.product_id.as_deref() {
                Some(id) => self.catalog.get(id).await?.map(|p| p.content_link),
                None => None,
            }
        } else {
            None
        };

        Ok(SaleView {
            status: sale.status(),
            amount: sale.amount,
            product_name: sale.product_name,
            sale_id: sale.id,
            content_link,
        })
    }

    /// Ask the provider about a pending sale and apply the answer.
    ///
    /// Goes through the same conditional transition as webhook delivery, so
    /// it may race a webhook freely.
    pub async fn refresh_sale(&self, sale_id: &str) -> Result<SaleView> {
        let sale = self
            .ledger
            .get_sale(sale_id)
            .await?
            .ok_or_else(|| PaymentError::RecordNotFound(sale_id.to_string()))?;

        let reference = match sale.external_reference.as_deref() {
            Some(reference) if sale.status() == RecordStatus::Pending => reference,
            _ => return self.sale_status(sale_id).await,
        };

        let result = self.gateway.transaction_status(reference).await;
        if !result.success {
            tracing::warn!(
                sale_id,
                reference,
                error = result.error_text(),
                "Status query failed, keeping current state"
            );
            return self.sale_status(sale_id).await;
        }

        let signal = ProviderSignal::from_optional(result.provider_status.as_deref());
        let outcome = self
            .engine
            .apply(reference, signal, result.provider_status.as_deref())
            .await?;
        if let ReconcileOutcome::Transitioned { status, .. } = &outcome {
            tracing::info!(sale_id, status = %status, "Sale reconciled via status query");
        }

        self.sale_status(sale_id).await
    }
}
