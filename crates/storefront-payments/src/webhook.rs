//! Provider Webhook Reconciliation
//!
//! Each inbound notification is handled independently:
//!
//! 1. Pull the correlation id and status out of the body using the ordered
//!    rules in [`REFERENCE_RULES`] and [`STATUS_RULES`].
//! 2. Normalize the status into a [`ProviderSignal`].
//! 3. Resolve the id against sales first, then withdrawals.
//! 4. Records already terminal are acknowledged untouched (redelivery).
//! 5. Otherwise apply the terminal status as a conditional write; only the
//!    call that actually moves the record runs the settlement side effects.
//!
//! Because step 5 is a compare-and-set on the stored row, duplicate or
//! reordered deliveries converge on whichever terminal status landed first.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::catalog::Catalog;
use crate::error::{PaymentError, Result};
use crate::fields::{FieldPath, first_match};
use crate::ledger::{LedgerRecord, LedgerStore, RecordKind, RecordStatus, Sale, Withdrawal};
use crate::notify::SaleNotifier;
use crate::session::SessionStore;
use crate::signal::ProviderSignal;

/// Where the correlation id may sit, highest precedence first
pub const REFERENCE_RULES: &[FieldPath] = &[
    FieldPath(&["reference"]),
    FieldPath(&["external_id"]),
    FieldPath(&["data", "reference"]),
    FieldPath(&["data", "id"]),
    FieldPath(&["data", "external_id"]),
];

/// Where the status may sit, highest precedence first
pub const STATUS_RULES: &[FieldPath] = &[FieldPath(&["status"]), FieldPath(&["data", "status"])];

/// Fields extracted from an inbound notification
#[derive(Clone, Debug)]
pub struct Notification {
    pub reference: String,
    /// Rule that produced `reference`
    pub matched_by: FieldPath,
    pub status: Option<String>,
    pub signal: ProviderSignal,
}

impl Notification {
    /// Extract from a raw body; no usable id is `WebhookMalformed`
    pub fn parse(payload: &Value) -> Result<Self> {
        let (matched_by, reference) = first_match(REFERENCE_RULES, payload).ok_or_else(|| {
            PaymentError::WebhookMalformed("no reference or external_id in body".into())
        })?;
        let status = first_match(STATUS_RULES, payload).map(|(_, s)| s);
        let signal = ProviderSignal::from_optional(status.as_deref());

        Ok(Self {
            reference,
            matched_by,
            status,
            signal,
        })
    }
}

/// A ledger record found by external reference
#[derive(Clone, Debug)]
pub enum ResolvedRecord {
    Sale(Sale),
    Withdrawal(Withdrawal),
}

/// What a notification did
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// This delivery moved the record out of `Pending`
    Transitioned {
        kind: RecordKind,
        id: String,
        status: RecordStatus,
    },
    /// Record was already terminal; acknowledged without changes
    Duplicate {
        kind: RecordKind,
        id: String,
        status: RecordStatus,
    },
    /// Status outside both synonym sets; record left `Pending`
    Ignored {
        kind: RecordKind,
        id: String,
        raw_status: Option<String>,
    },
}

impl ReconcileOutcome {
    pub fn message(&self) -> String {
        match self {
            Self::Transitioned { kind, status, .. } => format!("{kind} marked {status}"),
            Self::Duplicate { kind, .. } => format!("{kind} status already updated"),
            Self::Ignored { kind, .. } => format!("{kind} left pending"),
        }
    }

    pub const fn transitioned(&self) -> bool {
        matches!(self, Self::Transitioned { .. })
    }
}

/// Steps 4 and the unknown-signal branch, shared by both record kinds
fn precheck<R: LedgerRecord>(
    record: &R,
    signal: ProviderSignal,
    raw_status: Option<&str>,
) -> std::result::Result<RecordStatus, ReconcileOutcome> {
    if record.status().is_terminal() {
        tracing::info!(
            kind = %R::KIND,
            id = record.id(),
            status = %record.status(),
            "Record already terminal, acknowledging redelivery"
        );
        return Err(ReconcileOutcome::Duplicate {
            kind: R::KIND,
            id: record.id().to_string(),
            status: record.status(),
        });
    }

    signal.target_status().ok_or_else(|| {
        tracing::debug!(
            kind = %R::KIND,
            id = record.id(),
            raw_status = ?raw_status,
            "Non-terminal provider status, leaving record pending"
        );
        ReconcileOutcome::Ignored {
            kind: R::KIND,
            id: record.id().to_string(),
            raw_status: raw_status.map(str::to_string),
        }
    })
}

/// Webhook reconciliation engine
pub struct ReconciliationEngine {
    ledger: Arc<dyn LedgerStore>,
    sessions: Arc<dyn SessionStore>,
    catalog: Arc<dyn Catalog>,
    notifier: Arc<dyn SaleNotifier>,
}

impl ReconciliationEngine {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        sessions: Arc<dyn SessionStore>,
        catalog: Arc<dyn Catalog>,
        notifier: Arc<dyn SaleNotifier>,
    ) -> Self {
        Self {
            ledger,
            sessions,
            catalog,
            notifier,
        }
    }

    /// Process one webhook body
    pub async fn handle(&self, payload: &Value) -> Result<ReconcileOutcome> {
        let notification = match Notification::parse(payload) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(body = %payload, "Webhook without correlation id, payment may be stranded");
                return Err(e);
            }
        };
        tracing::info!(
            reference = %notification.reference,
            matched_by = %notification.matched_by,
            status = ?notification.status,
            signal = ?notification.signal,
            "Processing provider webhook"
        );

        self.apply(
            &notification.reference,
            notification.signal,
            notification.status.as_deref(),
        )
        .await
    }

    /// Apply a provider status to the record holding `reference`.
    ///
    /// Shared by webhook delivery and active status polling.
    pub async fn apply(
        &self,
        reference: &str,
        signal: ProviderSignal,
        raw_status: Option<&str>,
    ) -> Result<ReconcileOutcome> {
        match self.resolve(reference).await? {
            Some(ResolvedRecord::Sale(sale)) => self.apply_to_sale(sale, signal, raw_status).await,
            Some(ResolvedRecord::Withdrawal(withdrawal)) => {
                self.apply_to_withdrawal(withdrawal, signal, raw_status).await
            }
            None => {
                tracing::warn!(reference = %reference, "Reference not found in sales or withdrawals");
                Err(PaymentError::WebhookUnmatched(reference.to_string()))
            }
        }
    }

    /// Sales are checked before withdrawals; first match wins
    pub async fn resolve(&self, reference: &str) -> Result<Option<ResolvedRecord>> {
        if let Some(sale) = self.ledger.find_sale_by_reference(reference).await? {
            return Ok(Some(ResolvedRecord::Sale(sale)));
        }
        Ok(self
            .ledger
            .find_withdrawal_by_reference(reference)
            .await?
            .map(ResolvedRecord::Withdrawal))
    }

    async fn apply_to_sale(
        &self,
        sale: Sale,
        signal: ProviderSignal,
        raw_status: Option<&str>,
    ) -> Result<ReconcileOutcome> {
        let target = match precheck(&sale, signal, raw_status) {
            Ok(target) => target,
            Err(outcome) => {
                if sale.status() == RecordStatus::Settled {
                    self.consume_session(&sale).await?;
                }
                return Ok(outcome);
            }
        };

        let outcome = self.ledger.transition_sale(&sale.id, target).await?;
        let applied = outcome.applied();
        let sale = outcome.into_record();
        if !applied {
            // Lost the race to a concurrent delivery
            tracing::info!(sale_id = %sale.id, status = %sale.status(), "Concurrent delivery already settled sale");
            return Ok(ReconcileOutcome::Duplicate {
                kind: RecordKind::Sale,
                status: sale.status(),
                id: sale.id,
            });
        }

        tracing::info!(
            sale_id = %sale.id,
            amount = %sale.amount,
            status = %target,
            "Sale reconciled via provider"
        );
        if target == RecordStatus::Settled {
            // A session error still fails the delivery; the retry lands on
            // the duplicate path, which consumes the session again.
            let consumed = self.consume_session(&sale).await;
            self.fan_out(&sale).await;
            consumed?;
        }

        Ok(ReconcileOutcome::Transitioned {
            kind: RecordKind::Sale,
            id: sale.id,
            status: target,
        })
    }

    async fn apply_to_withdrawal(
        &self,
        withdrawal: Withdrawal,
        signal: ProviderSignal,
        raw_status: Option<&str>,
    ) -> Result<ReconcileOutcome> {
        let target = match precheck(&withdrawal, signal, raw_status) {
            Ok(target) => target,
            Err(outcome) => return Ok(outcome),
        };

        let outcome = self
            .ledger
            .transition_withdrawal(&withdrawal.id, target)
            .await?;
        let applied = outcome.applied();
        let withdrawal = outcome.into_record();
        if !applied {
            return Ok(ReconcileOutcome::Duplicate {
                kind: RecordKind::Withdrawal,
                status: withdrawal.status(),
                id: withdrawal.id,
            });
        }

        tracing::info!(
            withdrawal_id = %withdrawal.id,
            amount = %withdrawal.amount,
            status = %target,
            "Withdrawal reconciled via provider"
        );
        Ok(ReconcileOutcome::Transitioned {
            kind: RecordKind::Withdrawal,
            id: withdrawal.id,
            status: target,
        })
    }

    /// Mark the sale's checkout session used. Idempotent, so redeliveries
    /// repair a session left unmarked by an earlier store failure.
    async fn consume_session(&self, sale: &Sale) -> Result<()> {
        let Some(token) = &sale.session_token else {
            return Ok(());
        };
        self.sessions.mark_used(token).await.inspect_err(|e| {
            tracing::error!(sale_id = %sale.id, token = %token, error = %e, "Failed to mark checkout session used");
        })
    }

    /// Best effort; failures never undo the settlement
    async fn fan_out(&self, sale: &Sale) {
        let Some(product_id) = sale.product_id.as_deref() else {
            return;
        };
        let product = match self.catalog.get(product_id).await {
            Ok(Some(product)) => product,
            Ok(None) => {
                tracing::debug!(sale_id = %sale.id, product_id, "Product gone, skipping notifications");
                return;
            }
            Err(e) => {
                tracing::warn!(sale_id = %sale.id, error = %e, "Product lookup failed, skipping notifications");
                return;
            }
        };
        if let Err(e) = self.notifier.sale_settled(sale, &product).await {
            tracing::warn!(sale_id = %sale.id, error = %e, "Settlement notification failed");
        }
    }
}
