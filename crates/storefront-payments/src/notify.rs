//! Settlement Fan-out
//!
//! Once a sale settles, the merchant's own webhook and the attribution
//! service are told about it. Both are best effort: the reconciliation
//! engine logs a failure here and carries on.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::Serialize;
use serde_json::json;

use crate::catalog::Product;
use crate::error::{PaymentError, Result};
use crate::gateway::normalize_international;
use crate::ledger::Sale;

/// Receives settled sales
#[async_trait]
pub trait SaleNotifier: Send + Sync {
    async fn sale_settled(&self, sale: &Sale, product: &Product) -> Result<()>;
}

/// Drops every notification
pub struct NoopNotifier;

#[async_trait]
impl SaleNotifier for NoopNotifier {
    async fn sale_settled(&self, _sale: &Sale, _product: &Product) -> Result<()> {
        Ok(())
    }
}

/// Notifier configuration
#[derive(Clone, Debug)]
pub struct NotifierConfig {
    pub attribution_url: String,
    pub platform: String,
    pub currency: String,
    /// Share of the order value reported as gateway fee
    pub gateway_fee_rate: Decimal,
    pub timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            attribution_url: "https://api.utmify.com.br/api-credentials/orders".into(),
            platform: "MOZCOMPRAS".into(),
            currency: "MZN".into(),
            gateway_fee_rate: dec!(0.05),
            timeout: Duration::from_secs(10),
        }
    }
}

impl NotifierConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            attribution_url: std::env::var("UTMIFY_API_URL").unwrap_or(defaults.attribution_url),
            platform: std::env::var("STORE_PLATFORM").unwrap_or(defaults.platform),
            currency: std::env::var("STORE_CURRENCY").unwrap_or(defaults.currency),
            timeout: std::env::var("NOTIFY_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.timeout, Duration::from_secs),
            ..defaults
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttributionOrder {
    order_id: String,
    platform: String,
    payment_method: &'static str,
    status: &'static str,
    created_at: String,
    approved_date: String,
    currency: String,
    customer: AttributionCustomer,
    products: Vec<AttributionProduct>,
    tracking_parameters: serde_json::Value,
    commission: Commission,
}

#[derive(Debug, Serialize)]
struct AttributionCustomer {
    name: String,
    email: String,
    phone: String,
    ip: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttributionProduct {
    id: String,
    name: String,
    quantity: u32,
    price_in_cents: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Commission {
    total_price_in_cents: i64,
    gateway_fee_in_cents: i64,
    user_commission_in_cents: i64,
}

fn cents(amount: Decimal) -> i64 {
    (amount * dec!(100)).round().to_i64().unwrap_or(0)
}

fn attribution_order(sale: &Sale, product: &Product, config: &NotifierConfig) -> AttributionOrder {
    let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let total = cents(sale.amount);
    let fee = cents(sale.amount * config.gateway_fee_rate);
    let name = if sale.customer.name.is_empty() {
        "Cliente".to_string()
    } else {
        sale.customer.name.clone()
    };

    AttributionOrder {
        order_id: sale.id.clone(),
        platform: config.platform.clone(),
        payment_method: "unknown",
        status: "paid",
        created_at: stamp.clone(),
        approved_date: stamp,
        currency: config.currency.clone(),
        customer: AttributionCustomer {
            name,
            email: sale.customer.email.clone().unwrap_or_default(),
            phone: normalize_international(sale.customer.phone.as_deref().unwrap_or_default()),
            ip: "0.0.0.0",
        },
        products: vec![AttributionProduct {
            id: product.id.clone(),
            name: product.name.clone(),
            quantity: 1,
            price_in_cents: total,
        }],
        tracking_parameters: json!({
            "utm_source": null,
            "utm_medium": null,
            "utm_campaign": null,
        }),
        commission: Commission {
            total_price_in_cents: total,
            gateway_fee_in_cents: fee,
            user_commission_in_cents: total - fee,
        },
    }
}

/// reqwest-backed notifier for merchant webhooks and attribution
pub struct HttpNotifier {
    client: reqwest::Client,
    config: NotifierConfig,
}

impl HttpNotifier {
    pub fn new(config: NotifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn post_merchant_webhook(&self, url: &str, sale: &Sale) -> Result<()> {
        let body = json!({
            "event": "order.paid",
            "data": {
                "id": sale.id,
                "status": "paid",
                "amount": sale.amount,
                "reference": sale.external_reference,
            }
        });
        self.client
            .post(url)
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| PaymentError::Notification(format!("merchant webhook: {e}")))?;
        Ok(())
    }

    async fn post_attribution(&self, token: &str, sale: &Sale, product: &Product) -> Result<()> {
        let order = attribution_order(sale, product, &self.config);
        self.client
            .post(&self.config.attribution_url)
            .header("x-api-token", token)
            .json(&order)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| PaymentError::Notification(format!("attribution: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl SaleNotifier for HttpNotifier {
    async fn sale_settled(&self, sale: &Sale, product: &Product) -> Result<()> {
        let mut first_error = None;

        match product.utmify_id.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => {
                if let Err(e) = self.post_attribution(token, sale, product).await {
                    tracing::warn!(sale_id = %sale.id, error = %e, "Attribution notification failed");
                    first_error.get_or_insert(e);
                } else {
                    tracing::info!(sale_id = %sale.id, "Attribution notified");
                }
            }
            None => tracing::debug!(product_id = %product.id, "No attribution token, skipping"),
        }

        if let Some(url) = product.webhook_url.as_deref().filter(|u| !u.is_empty()) {
            if let Err(e) = self.post_merchant_webhook(url, sale).await {
                tracing::warn!(sale_id = %sale.id, error = %e, "Merchant webhook failed");
                first_error.get_or_insert(e);
            } else {
                tracing::info!(sale_id = %sale.id, url = %url, "Merchant webhook delivered");
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
