//! Merchant Withdrawals
//!
//! Withdrawals are checked against the settled balance before the provider
//! is ever called. Mobile-money B2C usually confirms inline, so a withdrawal
//! may be written directly as `Settled`; if the provider reports a
//! non-terminal status it is written `Pending` and settled by webhook.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{PaymentError, Result};
use crate::gateway::{Channel, GatewayRequest, PaymentGateway, PaymentResult};
use crate::ledger::{LedgerStore, RecordStatus, Withdrawal};
use crate::reporting::current_balance;
use crate::signal::ProviderSignal;

/// A merchant withdrawal request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub amount: Decimal,
    pub phone: String,
    pub channel: Channel,
}

/// Balance plus withdrawal history, newest first
#[derive(Clone, Debug, Serialize)]
pub struct WithdrawalHistory {
    pub balance: Decimal,
    pub withdrawals: Vec<Withdrawal>,
}

/// Status a successful B2C call leaves the withdrawal in
fn inline_status(result: &PaymentResult) -> RecordStatus {
    match result.provider_status.as_deref() {
        None => RecordStatus::Settled,
        Some(raw) => ProviderSignal::normalize(raw)
            .target_status()
            .unwrap_or(RecordStatus::Pending),
    }
}

/// Withdrawal service
pub struct PayoutService {
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    callback_url: Option<String>,
}

impl PayoutService {
    pub fn new(ledger: Arc<dyn LedgerStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            ledger,
            gateway,
            callback_url: None,
        }
    }

    #[must_use]
    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    /// Check balance, pay out, record the withdrawal
    pub async fn process(&self, request: WithdrawalRequest) -> Result<Withdrawal> {
        if request.amount < Decimal::ONE {
            return Err(PaymentError::InvalidAmount(format!(
                "withdrawal of {} is below the minimum of 1",
                request.amount
            )));
        }
        if !request.channel.supports_withdrawal() {
            return Err(PaymentError::UnsupportedChannel(format!(
                "withdrawals are not available on {}",
                request.channel
            )));
        }

        let available = current_balance(self.ledger.as_ref()).await?;
        if request.amount > available {
            tracing::warn!(
                requested = %request.amount,
                available = %available,
                "Withdrawal rejected, insufficient balance"
            );
            return Err(PaymentError::InsufficientBalance {
                requested: request.amount,
                available,
            });
        }

        let gateway_request = GatewayRequest {
            callback_url: self.callback_url.clone(),
            ..GatewayRequest::new(request.channel, request.amount, request.phone.clone())
        };
        let result = self.gateway.initiate_withdrawal(&gateway_request).await;

        if !result.success {
            let mut withdrawal = Withdrawal::new(
                request.amount,
                request.channel,
                request.phone,
                RecordStatus::Failed,
            );
            withdrawal.failure_reason = Some(result.error_text().to_string());
            self.ledger.insert_withdrawal(&withdrawal).await?;
            tracing::warn!(
                withdrawal_id = %withdrawal.id,
                error = result.error_text(),
                "Withdrawal failed at provider"
            );
            return Err(result.to_error());
        }

        let status = inline_status(&result);
        let mut withdrawal = Withdrawal::new(request.amount, request.channel, request.phone, status);
        withdrawal.external_reference = result.external_reference;
        self.ledger.insert_withdrawal(&withdrawal).await?;

        tracing::info!(
            withdrawal_id = %withdrawal.id,
            amount = %withdrawal.amount,
            channel = %withdrawal.channel,
            status = %status,
            reference = ?withdrawal.external_reference,
            "Withdrawal recorded"
        );
        Ok(withdrawal)
    }

    pub async fn history(&self) -> Result<WithdrawalHistory> {
        Ok(WithdrawalHistory {
            balance: current_balance(self.ledger.as_ref()).await?,
            withdrawals: self.ledger.withdrawals().await?,
        })
    }
}
