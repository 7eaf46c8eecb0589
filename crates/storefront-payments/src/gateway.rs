//! Provider Gateway Adapter
//!
//! Thin HTTP client for the mobile-money / card processor. Every outbound
//! call resolves to a [`PaymentResult`]; network failures, timeouts, non-2xx
//! answers and unreadable bodies all collapse to `success = false` with the
//! best error text the provider's envelope offers.
//!
//! ```text
//! C2B mobile money  POST {base}/api/v1/wallets/{wallet}/c2b/{mpesa|emola}
//! C2B card          POST {base}/api/v1/wallets/{wallet}/card-payment
//! B2C withdrawal    POST {base}/api/v1/wallets/{wallet}/b2c/{mpesa|emola}
//! Status            GET  {base}/api/v1/transactions/{reference}/status
//! ```

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PaymentError;
use crate::fields::{FieldPath, first_match};

const COUNTRY_CODE: &str = "258";
const LOCAL_LEN: usize = 9;

/// Where the provider puts the transaction id on an accepted call
const REFERENCE_FIELDS: &[FieldPath] = &[
    FieldPath(&["transaction_id"]),
    FieldPath(&["id"]),
    FieldPath(&["reference"]),
    FieldPath(&["debito_reference"]),
    FieldPath(&["data", "transaction_id"]),
    FieldPath(&["data", "id"]),
    FieldPath(&["data", "reference"]),
    FieldPath(&["data", "debito_reference"]),
];

/// Where an inline transaction status may appear
const STATUS_FIELDS: &[FieldPath] = &[
    FieldPath(&["status"]),
    FieldPath(&["transaction_status"]),
    FieldPath(&["data", "status"]),
];

/// The provider's error envelope is not stable; try the known shapes
const ERROR_FIELDS: &[FieldPath] = &[
    FieldPath(&["message"]),
    FieldPath(&["error"]),
    FieldPath(&["error", "message"]),
    FieldPath(&["errors", "0"]),
    FieldPath(&["errors", "0", "message"]),
    FieldPath(&["errors"]),
    FieldPath(&["detail"]),
    FieldPath(&["data", "message"]),
];

/// Supported payment rails
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Mpesa,
    Emola,
    Card,
}

/// MSISDN shape a rail expects on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhoneFormat {
    /// 9 digits, no country code
    Local,
    /// Country code + 9 digits
    International,
}

impl Channel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mpesa => "mpesa",
            Self::Emola => "emola",
            Self::Card => "card",
        }
    }

    pub const fn phone_format(self) -> PhoneFormat {
        match self {
            Self::Mpesa | Self::Emola => PhoneFormat::Local,
            Self::Card => PhoneFormat::International,
        }
    }

    /// Mobile-money B2C answers with the final outcome; the card rail has no payout
    pub const fn supports_withdrawal(self) -> bool {
        matches!(self, Self::Mpesa | Self::Emola)
    }

    /// Canonical wire form of a buyer-entered phone number
    pub fn wire_phone(self, phone: &str) -> String {
        match self.phone_format() {
            PhoneFormat::Local => normalize_local(phone),
            PhoneFormat::International => normalize_international(phone),
        }
    }
}

impl FromStr for Channel {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mpesa" | "m-pesa" => Ok(Self::Mpesa),
            "emola" | "e-mola" => Ok(Self::Emola),
            "card" | "bank" => Ok(Self::Card),
            other => Err(PaymentError::UnsupportedChannel(other.to_string())),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn digits(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

/// Strip the country code and keep the last 9 digits.
///
/// Input without digits is passed through; the provider decides validity.
pub fn normalize_local(phone: &str) -> String {
    let num = digits(phone);
    if num.is_empty() {
        return phone.trim().to_string();
    }
    let num = if num.len() > LOCAL_LEN && num.starts_with(COUNTRY_CODE) {
        num[COUNTRY_CODE.len()..].to_string()
    } else {
        num
    };
    if num.len() > LOCAL_LEN {
        num[num.len() - LOCAL_LEN..].to_string()
    } else {
        num
    }
}

/// Prefix 9-digit local numbers with the country code
pub fn normalize_international(phone: &str) -> String {
    let num = digits(phone);
    if num.is_empty() {
        return phone.trim().to_string();
    }
    if num.len() == LOCAL_LEN {
        format!("{COUNTRY_CODE}{num}")
    } else {
        num
    }
}

/// Buyer details forwarded to rails that want them (card)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl CustomerInfo {
    /// (first, last); a single word is used for both
    fn split_name(&self) -> (String, String) {
        let full = self
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("Customer");
        match full.split_once(' ') {
            Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
            None => (full.to_string(), full.to_string()),
        }
    }
}

/// Domain-level request for a payment or a withdrawal
#[derive(Clone, Debug)]
pub struct GatewayRequest {
    pub channel: Channel,
    pub amount: Decimal,
    /// Phone number as entered; canonicalized per channel on the wire
    pub phone: String,
    /// Free-text description shown on the provider side
    pub reference: Option<String>,
    pub callback_url: Option<String>,
    pub customer: Option<CustomerInfo>,
}

impl GatewayRequest {
    pub fn new(channel: Channel, amount: Decimal, phone: impl Into<String>) -> Self {
        Self {
            channel,
            amount,
            phone: phone.into(),
            reference: None,
            callback_url: None,
            customer: None,
        }
    }

    fn reference_or(&self, prefix: &str) -> String {
        self.reference
            .clone()
            .unwrap_or_else(|| format!("{prefix}-{}", Utc::now().timestamp_millis()))
    }
}

/// Why a gateway call did not succeed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayFailure {
    /// No answer within the timeout
    Timeout,
    /// Connection-level failure
    Transport,
    /// Non-2xx, or a 2xx explicitly flagged unsuccessful
    Rejected,
    /// 2xx with a body that is not a JSON object
    Malformed,
    /// Missing credentials or wallet
    NotConfigured,
}

/// Uniform outcome of any gateway call
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentResult {
    pub success: bool,
    /// Correlation id echoed back by webhooks
    pub external_reference: Option<String>,
    /// Provider body as received (a JSON string if it was not JSON)
    pub raw_response: Value,
    pub error_message: Option<String>,
    pub failure: Option<GatewayFailure>,
    /// Inline transaction status, when the provider included one
    pub provider_status: Option<String>,
}

impl PaymentResult {
    pub fn accepted(raw_response: Value) -> Self {
        let external_reference = first_match(REFERENCE_FIELDS, &raw_response).map(|(_, r)| r);
        let provider_status = first_match(STATUS_FIELDS, &raw_response).map(|(_, s)| s);
        Self {
            success: true,
            external_reference,
            raw_response,
            error_message: None,
            failure: None,
            provider_status,
        }
    }

    pub fn failed(failure: GatewayFailure, message: impl Into<String>, raw_response: Value) -> Self {
        Self {
            success: false,
            external_reference: None,
            raw_response,
            error_message: Some(message.into()),
            failure: Some(failure),
            provider_status: None,
        }
    }

    /// Normalize an HTTP answer
    pub fn from_http(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<Value>(body).ok();
        let raw = parsed.clone().unwrap_or_else(|| Value::String(body.to_string()));

        if !(200..300).contains(&status) {
            let message = parsed
                .as_ref()
                .and_then(|v| first_match(ERROR_FIELDS, v))
                .map_or_else(|| format!("Provider returned HTTP {status}"), |(_, m)| m);
            return Self::failed(GatewayFailure::Rejected, message, raw);
        }

        match parsed {
            Some(body) if body.is_object() => {
                if body.get("success") == Some(&Value::Bool(false)) {
                    let message = first_match(ERROR_FIELDS, &body)
                        .map_or_else(|| "Provider declined the request".to_string(), |(_, m)| m);
                    Self::failed(GatewayFailure::Rejected, message, body)
                } else {
                    Self::accepted(body)
                }
            }
            _ => Self::failed(
                GatewayFailure::Malformed,
                "Provider returned an unreadable response",
                raw,
            ),
        }
    }

    pub fn from_transport_error(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::failed(
                GatewayFailure::Timeout,
                "Provider did not respond in time",
                Value::Null,
            )
        } else {
            Self::failed(GatewayFailure::Transport, err.to_string(), Value::Null)
        }
    }

    pub fn error_text(&self) -> &str {
        self.error_message.as_deref().unwrap_or("Payment failed")
    }

    /// Error for a failed result, classified by failure kind
    pub fn to_error(&self) -> PaymentError {
        let message = self.error_text().to_string();
        match self.failure {
            Some(GatewayFailure::Timeout) => PaymentError::GatewayTimeout(message),
            Some(GatewayFailure::NotConfigured) => PaymentError::Config(message),
            _ => PaymentError::GatewayRejected(message),
        }
    }
}

/// Gateway configuration
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub mpesa_wallet: Option<String>,
    pub emola_wallet: Option<String>,
    pub bank_wallet: Option<String>,
    /// Used for any channel without its own wallet
    pub default_wallet: Option<String>,
    /// Default callback for card payments
    pub callback_url: Option<String>,
    pub timeout: Duration,
    pub status_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://my.debito.co.mz".into(),
            token: None,
            mpesa_wallet: None,
            emola_wallet: None,
            bank_wallet: None,
            default_wallet: None,
            callback_url: None,
            timeout: Duration::from_secs(60),
            status_timeout: Duration::from_secs(10),
        }
    }
}

fn env_opt(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| std::env::var(k).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let token = env_opt(&["DEBITO_TOKEN", "TOKEN_DEBITO", "debito_token"])
            .map(|t| t.strip_prefix("Bearer ").map(str::to_string).unwrap_or(t));
        let timeout = env_opt(&["DEBITO_TIMEOUT_SECS"])
            .and_then(|s| s.parse().ok())
            .map_or(defaults.timeout, Duration::from_secs);

        Self {
            base_url: env_opt(&["DEBITO_API_URL", "API_BASE_URL"]).unwrap_or(defaults.base_url),
            token,
            mpesa_wallet: env_opt(&["DEBITO_WALLET_ID_MPESA", "MPESA_API_KEY"]),
            emola_wallet: env_opt(&["DEBITO_WALLET_ID_EMOLA", "EMOLA_API_KEY"]),
            bank_wallet: env_opt(&["DEBITO_WALLET_ID_BANK"]),
            default_wallet: env_opt(&["DEBITO_WALLET_ID", "WALLET_ID"]),
            callback_url: env_opt(&["DEBITO_CALLBACK_URL"]),
            timeout,
            status_timeout: defaults.status_timeout,
        }
    }

    /// Wallet a channel's calls are booked against
    pub fn wallet_for(&self, channel: Channel) -> Option<&str> {
        let specific = match channel {
            Channel::Mpesa => self.mpesa_wallet.as_deref(),
            Channel::Emola => self.emola_wallet.as_deref(),
            Channel::Card => self.bank_wallet.as_deref(),
        };
        specific.or(self.default_wallet.as_deref())
    }

    pub const fn is_configured(&self) -> bool {
        self.token.is_some()
    }
}

/// Gateway trait (Strategy pattern)
///
/// Calls never return `Err`: every failure is a `PaymentResult` with
/// `success = false`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// C2B: buyer pays the merchant
    async fn initiate_payment(&self, request: &GatewayRequest) -> PaymentResult;

    /// B2C: merchant pays out
    async fn initiate_withdrawal(&self, request: &GatewayRequest) -> PaymentResult;

    /// Provider's current view of a transaction
    async fn transaction_status(&self, reference: &str) -> PaymentResult;

    /// Credentials present
    fn is_configured(&self) -> bool {
        true
    }

    fn name(&self) -> &str;
}

#[derive(Serialize)]
struct MobileMoneyPayload<'a> {
    msisdn: String,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    reference_description: String,
    internal_notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
}

#[derive(Serialize)]
struct CardPayload<'a> {
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    reference_description: String,
    first_name: String,
    last_name: String,
    email: &'a str,
    phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
}

/// reqwest-backed client for the Debito wallet API
pub struct DebitoGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl DebitoGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, PaymentError> {
        Self::new(GatewayConfig::from_env())
    }

    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    /// Base URL plus escaped path segments
    fn segment_url(&self, segments: &[&str]) -> Result<reqwest::Url, PaymentResult> {
        let invalid = |reason: String| {
            PaymentResult::failed(
                GatewayFailure::NotConfigured,
                format!("Invalid provider base URL: {reason}"),
                Value::Null,
            )
        };
        let mut url =
            reqwest::Url::parse(&self.config.base_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid(self.config.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn wallet(&self, channel: Channel) -> Result<&str, PaymentResult> {
        self.config.wallet_for(channel).ok_or_else(|| {
            PaymentResult::failed(
                GatewayFailure::NotConfigured,
                format!("No wallet configured for {channel}"),
                Value::Null,
            )
        })
    }

    fn token(&self) -> Result<&str, PaymentResult> {
        self.config.token.as_deref().ok_or_else(|| {
            PaymentResult::failed(
                GatewayFailure::NotConfigured,
                "Provider token not configured",
                Value::Null,
            )
        })
    }

    async fn send(&self, builder: reqwest::RequestBuilder, token: &str) -> PaymentResult {
        let response = match builder
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Gateway call failed");
                return PaymentResult::from_transport_error(&e);
            }
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return PaymentResult::from_transport_error(&e),
        };
        tracing::debug!(status, body = %body, "Gateway response");

        let result = PaymentResult::from_http(status, &body);
        if !result.success {
            tracing::warn!(status, error = result.error_text(), "Gateway rejected call");
        }
        result
    }

    async fn post_mobile_money(
        &self,
        direction: &str,
        request: &GatewayRequest,
        payload: &MobileMoneyPayload<'_>,
    ) -> PaymentResult {
        let (token, wallet) = match (self.token(), self.wallet(request.channel)) {
            (Ok(token), Ok(wallet)) => (token, wallet),
            (Err(failed), _) | (_, Err(failed)) => return failed,
        };
        let url = self.url(&format!(
            "/api/v1/wallets/{wallet}/{direction}/{}",
            request.channel
        ));
        self.send(self.client.post(url).json(payload), token).await
    }
}

#[async_trait]
impl PaymentGateway for DebitoGateway {
    async fn initiate_payment(&self, request: &GatewayRequest) -> PaymentResult {
        tracing::info!(
            channel = %request.channel,
            amount = %request.amount,
            "Initiating C2B payment"
        );
        let callback_url = request
            .callback_url
            .as_deref()
            .or(self.config.callback_url.as_deref());

        if request.channel == Channel::Card {
            let (token, wallet) = match (self.token(), self.wallet(Channel::Card)) {
                (Ok(token), Ok(wallet)) => (token, wallet),
                (Err(failed), _) | (_, Err(failed)) => return failed,
            };
            let customer = request.customer.clone().unwrap_or_default();
            let (first_name, last_name) = customer.split_name();
            let payload = CardPayload {
                amount: request.amount,
                reference_description: request.reference_or("Ped"),
                first_name,
                last_name,
                email: customer.email.as_deref().unwrap_or("customer@example.com"),
                phone: Channel::Card.wire_phone(&request.phone),
                callback_url,
            };
            let url = self.url(&format!("/api/v1/wallets/{wallet}/card-payment"));
            return self.send(self.client.post(url).json(&payload), token).await;
        }

        let payload = MobileMoneyPayload {
            msisdn: request.channel.wire_phone(&request.phone),
            amount: request.amount,
            reference_description: request.reference_or("Ped"),
            internal_notes: format!("Pagamento {} checkout", request.channel.as_str().to_uppercase()),
            callback_url,
        };
        self.post_mobile_money("c2b", request, &payload).await
    }

    async fn initiate_withdrawal(&self, request: &GatewayRequest) -> PaymentResult {
        tracing::info!(
            channel = %request.channel,
            amount = %request.amount,
            "Initiating B2C withdrawal"
        );
        if !request.channel.supports_withdrawal() {
            return PaymentResult::failed(
                GatewayFailure::Rejected,
                format!("Withdrawals are not available on {}", request.channel),
                Value::Null,
            );
        }

        let payload = MobileMoneyPayload {
            msisdn: request.channel.wire_phone(&request.phone),
            amount: request.amount,
            reference_description: request.reference_or("Saque"),
            internal_notes: format!("Saque {}", request.channel.as_str().to_uppercase()),
            callback_url: request.callback_url.as_deref(),
        };
        self.post_mobile_money("b2c", request, &payload).await
    }

    async fn transaction_status(&self, reference: &str) -> PaymentResult {
        let token = match self.token() {
            Ok(token) => token,
            Err(failed) => return failed,
        };
        let url = match self.segment_url(&["api", "v1", "transactions", reference, "status"]) {
            Ok(url) => url,
            Err(failed) => return failed,
        };
        let builder = self.client.get(url).timeout(self.config.status_timeout);
        self.send(builder, token).await
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    fn name(&self) -> &str {
        "debito"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn config_for(base_url: String) -> GatewayConfig {
        GatewayConfig {
            base_url,
            token: Some("tok".into()),
            mpesa_wallet: Some("W-MPESA".into()),
            default_wallet: Some("W-DEFAULT".into()),
            bank_wallet: Some("W-BANK".into()),
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn test_phone_normalization() {
        assert_eq!(normalize_local("841234567"), "841234567");
        assert_eq!(normalize_local("+258 84 123 4567"), "841234567");
        assert_eq!(normalize_local("00258841234567"), "841234567");
        assert_eq!(normalize_local("8412"), "8412");
        assert_eq!(normalize_local("not a phone"), "not a phone");

        assert_eq!(normalize_international("84 123 4567"), "258841234567");
        assert_eq!(normalize_international("258841234567"), "258841234567");
        assert_eq!(Channel::Card.wire_phone("841234567"), "258841234567");
        assert_eq!(Channel::Mpesa.wire_phone("258841234567"), "841234567");
    }

    #[test]
    fn test_channel_parsing() {
        assert_eq!("M-Pesa".parse::<Channel>().unwrap(), Channel::Mpesa);
        assert_eq!("emola".parse::<Channel>().unwrap(), Channel::Emola);
        assert!(matches!(
            "paypal".parse::<Channel>(),
            Err(PaymentError::UnsupportedChannel(_))
        ));
        assert!(!Channel::Card.supports_withdrawal());
    }

    #[test]
    fn test_accepted_response_reference_shapes() {
        let top = PaymentResult::from_http(200, r#"{"transaction_id":"ref-1","status":"pending"}"#);
        assert!(top.success);
        assert_eq!(top.external_reference.as_deref(), Some("ref-1"));
        assert_eq!(top.provider_status.as_deref(), Some("pending"));

        let nested = PaymentResult::from_http(201, r#"{"data":{"debito_reference":12345}}"#);
        assert_eq!(nested.external_reference.as_deref(), Some("12345"));

        let none = PaymentResult::from_http(200, r#"{"ok":true}"#);
        assert!(none.success);
        assert!(none.external_reference.is_none());
    }

    #[test]
    fn test_failure_shapes_degrade_gracefully() {
        let msg = PaymentResult::from_http(422, r#"{"message":"Saldo insuficiente"}"#);
        assert!(!msg.success);
        assert_eq!(msg.error_text(), "Saldo insuficiente");
        assert!(matches!(msg.to_error(), PaymentError::GatewayRejected(_)));

        let errors = PaymentResult::from_http(400, r#"{"errors":["msisdn invalid"]}"#);
        assert_eq!(errors.error_text(), "msisdn invalid");

        let html = PaymentResult::from_http(502, "<html>Bad Gateway</html>");
        assert_eq!(html.error_text(), "Provider returned HTTP 502");
        assert_eq!(html.raw_response, json!("<html>Bad Gateway</html>"));

        let garbled = PaymentResult::from_http(200, "OK");
        assert!(!garbled.success);
        assert_eq!(garbled.failure, Some(GatewayFailure::Malformed));

        let flagged = PaymentResult::from_http(200, r#"{"success":false,"error":"wallet locked"}"#);
        assert!(!flagged.success);
        assert_eq!(flagged.error_text(), "wallet locked");
    }

    #[tokio::test]
    async fn test_mpesa_payment_wire_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/wallets/W-MPESA/c2b/mpesa")
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::PartialJson(json!({
                "msisdn": "841234567",
                "amount": 197.0
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"transaction_id":"ref-1"}"#)
            .expect(1)
            .create_async()
            .await;

        let gateway = DebitoGateway::new(config_for(server.url())).unwrap();
        let request = GatewayRequest::new(Channel::Mpesa, dec!(197.00), "+258 84 123 4567");
        let result = gateway.initiate_payment(&request).await;

        mock.assert_async().await;
        assert!(result.success);
        assert_eq!(result.external_reference.as_deref(), Some("ref-1"));
    }

    #[tokio::test]
    async fn test_card_payment_uses_international_phone_and_bank_wallet() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/wallets/W-BANK/card-payment")
            .match_body(Matcher::PartialJson(json!({
                "phone": "258841234567",
                "first_name": "Ana",
                "last_name": "Maria Silva",
                "callback_url": "https://shop.example/webhooks/provider"
            })))
            .with_status(200)
            .with_body(r#"{"id":"card-9"}"#)
            .create_async()
            .await;

        let gateway = DebitoGateway::new(config_for(server.url())).unwrap();
        let mut request = GatewayRequest::new(Channel::Card, dec!(497), "841234567");
        request.callback_url = Some("https://shop.example/webhooks/provider".into());
        request.customer = Some(CustomerInfo {
            name: Some("Ana Maria Silva".into()),
            email: Some("ana@example.com".into()),
            phone: None,
        });
        let result = gateway.initiate_payment(&request).await;

        mock.assert_async().await;
        assert_eq!(result.external_reference.as_deref(), Some("card-9"));
    }

    #[tokio::test]
    async fn test_withdrawal_falls_back_to_default_wallet() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/wallets/W-DEFAULT/b2c/emola")
            .with_status(200)
            .with_body(r#"{"id":"wd-1","status":"completed"}"#)
            .create_async()
            .await;

        let gateway = DebitoGateway::new(config_for(server.url())).unwrap();
        let request = GatewayRequest::new(Channel::Emola, dec!(50), "861234567");
        let result = gateway.initiate_withdrawal(&request).await;

        mock.assert_async().await;
        assert!(result.success);
        assert_eq!(result.provider_status.as_deref(), Some("completed"));
    }

    #[tokio::test]
    async fn test_transaction_status_query() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/transactions/ref-1/status")
            .with_status(200)
            .with_body(r#"{"reference":"ref-1","status":"successful"}"#)
            .create_async()
            .await;

        let gateway = DebitoGateway::new(config_for(server.url())).unwrap();
        let result = gateway.transaction_status("ref-1").await;
        assert_eq!(result.provider_status.as_deref(), Some("successful"));
    }

    #[tokio::test]
    async fn test_status_reference_is_escaped() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/transactions/ref%2F..%2Fx%20y/status")
            .with_status(200)
            .with_body(r#"{"status":"pending"}"#)
            .create_async()
            .await;

        let gateway = DebitoGateway::new(config_for(server.url())).unwrap();
        let result = gateway.transaction_status("ref/../x y").await;

        mock.assert_async().await;
        assert_eq!(result.provider_status.as_deref(), Some("pending"));
    }

    #[tokio::test]
    async fn test_missing_token_never_calls_out() {
        let config = GatewayConfig {
            token: None,
            ..config_for("http://127.0.0.1:9".into())
        };
        let gateway = DebitoGateway::new(config).unwrap();
        assert!(!gateway.is_configured());

        let request = GatewayRequest::new(Channel::Mpesa, dec!(10), "841234567");
        let result = gateway.initiate_payment(&request).await;
        assert_eq!(result.failure, Some(GatewayFailure::NotConfigured));
        assert!(matches!(result.to_error(), PaymentError::Config(_)));
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        // Accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = GatewayConfig {
            timeout: Duration::from_millis(200),
            ..config_for(format!("http://{addr}"))
        };
        let gateway = DebitoGateway::new(config).unwrap();
        let request = GatewayRequest::new(Channel::Mpesa, dec!(10), "841234567");
        let result = gateway.initiate_payment(&request).await;

        assert_eq!(result.failure, Some(GatewayFailure::Timeout));
        assert!(matches!(result.to_error(), PaymentError::GatewayTimeout(_)));
        drop(listener);
    }
}
