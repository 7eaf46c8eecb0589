//! Payment Error Types

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// No unused checkout session with this token
    #[error("Checkout session not found: {0}")]
    SessionNotFound(String),

    /// Session already consumed by a settled sale
    #[error("Checkout session already used: {0}")]
    SessionAlreadyUsed(String),

    /// Session past its expiry (only raised when expiry is enforced)
    #[error("Checkout session expired: {0}")]
    SessionExpired(String),

    /// Primary key collision in a store
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Product id resolves to neither the mock table nor the catalog
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Amount {submitted} does not match product price {expected}")]
    AmountMismatch { submitted: Decimal, expected: Decimal },

    #[error("Unsupported channel: {0}")]
    UnsupportedChannel(String),

    /// Provider did not answer within the configured timeout
    #[error("Gateway timeout: {0}")]
    GatewayTimeout(String),

    /// Provider refused the request or answered with something unusable
    #[error("Gateway rejected: {0}")]
    GatewayRejected(String),

    /// Webhook body carries no correlation identifier
    #[error("Webhook malformed: {0}")]
    WebhookMalformed(String),

    /// Webhook reference matches no sale or withdrawal
    #[error("Webhook reference not found: {0}")]
    WebhookUnmatched(String),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Outbound merchant/attribution notification failed
    #[error("Notification error: {0}")]
    Notification(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl PaymentError {
    /// Check if this error is retryable by the caller.
    ///
    /// Nothing is retried inside the crate; this only tells the caller whether
    /// resubmitting (buyer) or redelivering (provider) can succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GatewayTimeout(_)
                | Self::GatewayRejected(_)
                | Self::WebhookUnmatched(_)
                | Self::Conflict(_)
                | Self::Storage(_)
        )
    }

    /// Get user-friendly message
    pub const fn user_message(&self) -> &str {
        match self {
            Self::SessionNotFound(_) | Self::SessionAlreadyUsed(_) | Self::SessionExpired(_) => {
                "This checkout is no longer available."
            }
            Self::ProductNotFound(_) => "Product not found.",
            Self::InvalidAmount(_) => "The amount is invalid.",
            Self::AmountMismatch { .. } => "The amount does not match the product price.",
            Self::UnsupportedChannel(_) => "This payment method is not supported.",
            Self::GatewayTimeout(_) => "The payment provider did not respond. Please try again.",
            Self::GatewayRejected(_) => "Payment processing failed. Please try again.",
            Self::InsufficientBalance { .. } => "Insufficient balance for this withdrawal.",
            Self::Config(_) => "Service configuration error.",
            _ => "An error occurred processing your request.",
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for PaymentError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Storage(format!("store lock poisoned: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_retryable_classification() {
        assert!(PaymentError::GatewayTimeout("slow".into()).is_retryable());
        assert!(PaymentError::WebhookUnmatched("ref-1".into()).is_retryable());
        assert!(!PaymentError::WebhookMalformed("{}".into()).is_retryable());
        assert!(
            !PaymentError::InsufficientBalance {
                requested: dec!(500),
                available: dec!(197),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_insufficient_balance_message() {
        let err = PaymentError::InsufficientBalance {
            requested: dec!(500),
            available: dec!(197.00),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient balance: requested 500, available 197.00"
        );
        assert_eq!(err.user_message(), "Insufficient balance for this withdrawal.");
    }
}
