//! HTTP Handlers

use std::str::FromStr;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use storefront_payments::{
    Channel, DashboardSummary, PaymentError, PaymentSubmission, Product, ReconcileOutcome,
    SaleView, SessionToken, Withdrawal, WithdrawalHistory, WithdrawalRequest,
};

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub gateway: String,
    pub gateway_configured: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutPage {
    pub token: SessionToken,
    pub product: Product,
    pub expires_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPaymentRequest {
    pub amount: Decimal,
    pub phone: String,
    pub provider: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPaymentResponse {
    pub success: bool,
    pub sale_id: String,
    pub redirect: String,
}

#[derive(Debug, Deserialize)]
pub struct ProcessWithdrawalRequest {
    pub amount: Decimal,
    pub phone: String,
    pub provider: String,
}

#[derive(Debug, Serialize)]
pub struct ProcessWithdrawalResponse {
    pub success: bool,
    pub withdrawal: Withdrawal,
    pub balance: Decimal,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub outcome: ReconcileOutcome,
}

// ============================================================================
// Error Mapping
// ============================================================================

/// Status and machine code for each error kind
const fn classify(err: &PaymentError) -> (StatusCode, &'static str) {
    match err {
        PaymentError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
        PaymentError::SessionAlreadyUsed(_) => (StatusCode::GONE, "SESSION_USED"),
        PaymentError::SessionExpired(_) => (StatusCode::GONE, "SESSION_EXPIRED"),
        PaymentError::ProductNotFound(_) => (StatusCode::NOT_FOUND, "PRODUCT_NOT_FOUND"),
        PaymentError::RecordNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        PaymentError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
        PaymentError::AmountMismatch { .. } => (StatusCode::BAD_REQUEST, "AMOUNT_MISMATCH"),
        PaymentError::UnsupportedChannel(_) => (StatusCode::BAD_REQUEST, "UNSUPPORTED_CHANNEL"),
        PaymentError::InsufficientBalance { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_BALANCE")
        }
        // The request itself was fine; the buyer sees a failed payment
        PaymentError::GatewayTimeout(_) => (StatusCode::OK, "GATEWAY_TIMEOUT"),
        PaymentError::GatewayRejected(_) => (StatusCode::OK, "PAYMENT_FAILED"),
        PaymentError::WebhookMalformed(_) => (StatusCode::BAD_REQUEST, "WEBHOOK_MALFORMED"),
        PaymentError::WebhookUnmatched(_) => (StatusCode::NOT_FOUND, "WEBHOOK_UNMATCHED"),
        PaymentError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
        PaymentError::InvalidTransition(_)
        | PaymentError::Notification(_)
        | PaymentError::Config(_)
        | PaymentError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    }
}

fn api_error(err: &PaymentError) -> ApiError {
    let (status, code) = classify(err);
    let error = if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
        err.user_message().to_string()
    } else {
        tracing::debug!(error = %err, code, "Request rejected");
        match err {
            PaymentError::GatewayTimeout(m) | PaymentError::GatewayRejected(m) => m.clone(),
            _ => err.to_string(),
        }
    };

    (
        status,
        Json(ErrorResponse {
            success: false,
            error,
            code: code.into(),
        }),
    )
}

fn parse_channel(provider: &str) -> Result<Channel, ApiError> {
    Channel::from_str(provider).map_err(|e| api_error(&e))
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        gateway: state.gateway.name().to_string(),
        gateway_configured: state.gateway.is_configured(),
    })
}

/// Product listing
pub async fn list_products(State(state): State<AppState>) -> Result<Json<Vec<Product>>, ApiError> {
    let products = state.catalog.list().await.map_err(|e| api_error(&e))?;
    Ok(Json(products))
}

/// Open a checkout session and send the buyer to it
pub async fn init_checkout(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<Redirect, ApiError> {
    let session = state
        .checkout
        .init_checkout(&product_id)
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Redirect::to(&format!("/c/{}", session.token)))
}

/// Checkout page data
pub async fn show_checkout(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<CheckoutPage>, ApiError> {
    let token = SessionToken::from_string(token);
    let view = state
        .checkout
        .load_checkout(&token)
        .await
        .map_err(|e| api_error(&e))?;

    Ok(Json(CheckoutPage {
        token: view.session.token,
        product: view.product,
        expires_at: view.session.expires_at.to_rfc3339(),
    }))
}

/// Submit a payment
pub async fn process_payment(
    State(state): State<AppState>,
    Json(payload): Json<ProcessPaymentRequest>,
) -> Result<Json<ProcessPaymentResponse>, ApiError> {
    let submission = PaymentSubmission {
        amount: payload.amount,
        phone: payload.phone,
        channel: parse_channel(&payload.provider)?,
        name: payload.name,
        email: payload.email,
        product_id: payload.product_id,
        session_token: payload
            .session_token
            .filter(|t| !t.is_empty())
            .map(SessionToken::from_string),
    };

    let accepted = state
        .checkout
        .process_payment(submission)
        .await
        .map_err(|e| api_error(&e))?;

    Ok(Json(ProcessPaymentResponse {
        success: true,
        sale_id: accepted.sale_id,
        redirect: accepted.redirect,
    }))
}

/// Thank-you page data; a pending sale is a normal answer here
pub async fn thank_you(
    State(state): State<AppState>,
    Path(sale_id): Path<String>,
) -> Result<Json<SaleView>, ApiError> {
    let view = state
        .checkout
        .sale_status(&sale_id)
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Json(view))
}

/// Poll the provider for a pending sale
pub async fn checkout_status(
    State(state): State<AppState>,
    Path(sale_id): Path<String>,
) -> Result<Json<SaleView>, ApiError> {
    let view = state
        .checkout
        .refresh_sale(&sale_id)
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Json(view))
}

/// Provider webhook
pub async fn provider_webhook(State(state): State<AppState>, body: String) -> Response {
    let payload: serde_json::Value = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, body = %body, "Webhook body is not JSON");
            let err = PaymentError::WebhookMalformed(e.to_string());
            return api_error(&err).into_response();
        }
    };

    match state.engine.handle(&payload).await {
        Ok(outcome) => Json(WebhookResponse {
            success: true,
            message: outcome.message(),
            outcome,
        })
        .into_response(),
        Err(e) => api_error(&e).into_response(),
    }
}

/// Merchant withdrawal
pub async fn process_withdrawal(
    State(state): State<AppState>,
    Json(payload): Json<ProcessWithdrawalRequest>,
) -> Result<Json<ProcessWithdrawalResponse>, ApiError> {
    let request = WithdrawalRequest {
        amount: payload.amount,
        phone: payload.phone,
        channel: parse_channel(&payload.provider)?,
    };

    let withdrawal = state
        .payouts
        .process(request)
        .await
        .map_err(|e| api_error(&e))?;
    let history = state.payouts.history().await.map_err(|e| api_error(&e))?;

    Ok(Json(ProcessWithdrawalResponse {
        success: true,
        withdrawal,
        balance: history.balance,
    }))
}

/// Balance and withdrawal history
pub async fn list_withdrawals(
    State(state): State<AppState>,
) -> Result<Json<WithdrawalHistory>, ApiError> {
    let history = state.payouts.history().await.map_err(|e| api_error(&e))?;
    Ok(Json(history))
}

/// Merchant dashboard
pub async fn dashboard(State(state): State<AppState>) -> Result<Json<DashboardSummary>, ApiError> {
    let summary = DashboardSummary::snapshot(state.ledger.as_ref())
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_classification() {
        assert_eq!(
            classify(&PaymentError::WebhookMalformed("{}".into())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            classify(&PaymentError::WebhookUnmatched("r".into())).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            classify(&PaymentError::Storage("down".into())).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            classify(&PaymentError::InsufficientBalance {
                requested: dec!(500),
                available: dec!(197),
            })
            .1,
            "INSUFFICIENT_BALANCE"
        );
    }

    #[test]
    fn test_gateway_failure_is_soft() {
        let (status, Json(body)) = api_error(&PaymentError::GatewayRejected("Saldo insuficiente".into()));
        assert_eq!(status, StatusCode::OK);
        assert!(!body.success);
        assert_eq!(body.error, "Saldo insuficiente");
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let (_, Json(body)) = api_error(&PaymentError::Storage("lock poisoned".into()));
        assert_eq!(body.error, "An error occurred processing your request.");
    }
}
