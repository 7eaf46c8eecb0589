//! Transaction Ledger
//!
//! Sales (money in) and withdrawals (money out) share one state machine:
//!
//! ```text
//!            ┌──── success ───▶ Settled
//! Pending ───┤
//!            └──── failure ───▶ Failed
//! ```
//!
//! A record's status changes at most once, and only out of `Pending`. The
//! status lives inside [`Lifecycle`], whose only mutator is
//! [`Lifecycle::transition`], so no code path can skip the guard. Stores must
//! apply that transition as a single conditional write per record.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PaymentError, Result};
use crate::gateway::Channel;
use crate::session::SessionToken;

/// Ledger record status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Settled,
    Failed,
}

impl RecordStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Settled | Self::Failed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Settled => "settled",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which table a record lives in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Sale,
    Withdrawal,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sale => write!(f, "sale"),
            Self::Withdrawal => write!(f, "withdrawal"),
        }
    }
}

/// Status plus timestamps; the single place status can change
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    status: RecordStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Lifecycle {
    /// Start in any status. Terminal starts are for calls the provider
    /// already answered (inline payouts, failed initiations).
    pub fn starting_at(status: RecordStatus) -> Self {
        let now = Utc::now();
        Self {
            status,
            created_at: now,
            updated_at: now,
        }
    }

    pub const fn status(&self) -> RecordStatus {
        self.status
    }

    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Move `Pending` to a terminal status.
    ///
    /// Returns `Ok(false)` without touching anything when already terminal.
    pub fn transition(&mut self, next: RecordStatus) -> Result<bool> {
        if !next.is_terminal() {
            return Err(PaymentError::InvalidTransition(format!(
                "{} -> {next}",
                self.status
            )));
        }
        if self.status.is_terminal() {
            return Ok(false);
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(true)
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, created_at: DateTime<Utc>) {
        self.created_at = created_at;
        self.updated_at = created_at;
    }
}

/// Common view over sales and withdrawals
pub trait LedgerRecord: Clone + Send + Sync + 'static {
    const KIND: RecordKind;

    fn id(&self) -> &str;
    fn amount(&self) -> Decimal;
    fn external_reference(&self) -> Option<&str>;
    fn lifecycle(&self) -> &Lifecycle;
    fn lifecycle_mut(&mut self) -> &mut Lifecycle;

    fn status(&self) -> RecordStatus {
        self.lifecycle().status()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.lifecycle().created_at()
    }
}

/// Buyer metadata, descriptive only
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterparty {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Buyer paid merchant
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sale {
    pub id: String,
    pub amount: Decimal,
    /// Correlation id from the gateway; `None` means unreconcilable by webhook
    pub external_reference: Option<String>,
    pub customer: Counterparty,
    pub product_id: Option<String>,
    pub product_name: String,
    pub channel: Channel,
    /// Checkout session to consume when this sale settles
    pub session_token: Option<SessionToken>,
    pub failure_reason: Option<String>,
    #[serde(flatten)]
    lifecycle: Lifecycle,
}

impl Sale {
    /// New sale awaiting provider confirmation
    pub fn pending(amount: Decimal, channel: Channel, external_reference: Option<String>) -> Self {
        Self {
            id: format!("SALE-{}", Uuid::new_v4().simple()),
            amount,
            external_reference,
            customer: Counterparty::default(),
            product_id: None,
            product_name: "Venda Avulsa".into(),
            channel,
            session_token: None,
            failure_reason: None,
            lifecycle: Lifecycle::starting_at(RecordStatus::Pending),
        }
    }

    /// Audit record for an initiation the provider refused
    pub fn failed(amount: Decimal, channel: Channel, reason: impl Into<String>) -> Self {
        Self {
            failure_reason: Some(reason.into()),
            lifecycle: Lifecycle::starting_at(RecordStatus::Failed),
            ..Self::pending(amount, channel, None)
        }
    }

    pub const fn status(&self) -> RecordStatus {
        self.lifecycle.status()
    }
}

impl LedgerRecord for Sale {
    const KIND: RecordKind = RecordKind::Sale;

    fn id(&self) -> &str {
        &self.id
    }

    fn amount(&self) -> Decimal {
        self.amount
    }

    fn external_reference(&self) -> Option<&str> {
        self.external_reference.as_deref()
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }
}

/// Merchant paid out
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: String,
    pub amount: Decimal,
    pub external_reference: Option<String>,
    pub channel: Channel,
    /// Destination phone number
    pub destination: String,
    pub failure_reason: Option<String>,
    #[serde(flatten)]
    lifecycle: Lifecycle,
}

impl Withdrawal {
    pub fn new(
        amount: Decimal,
        channel: Channel,
        destination: impl Into<String>,
        status: RecordStatus,
    ) -> Self {
        Self {
            id: format!("WD-{}", Uuid::new_v4().simple()),
            amount,
            external_reference: None,
            channel,
            destination: destination.into(),
            failure_reason: None,
            lifecycle: Lifecycle::starting_at(status),
        }
    }

    pub const fn status(&self) -> RecordStatus {
        self.lifecycle.status()
    }
}

impl LedgerRecord for Withdrawal {
    const KIND: RecordKind = RecordKind::Withdrawal;

    fn id(&self) -> &str {
        &self.id
    }

    fn amount(&self) -> Decimal {
        self.amount
    }

    fn external_reference(&self) -> Option<&str> {
        self.external_reference.as_deref()
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }
}

/// Result of a conditional status write
#[derive(Clone, Debug)]
pub enum TransitionOutcome<R> {
    /// This call moved the record out of `Pending`
    Applied(R),
    /// Record was already terminal; nothing written
    Unchanged(R),
}

impl<R> TransitionOutcome<R> {
    pub const fn applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub const fn record(&self) -> &R {
        match self {
            Self::Applied(r) | Self::Unchanged(r) => r,
        }
    }

    pub fn into_record(self) -> R {
        match self {
            Self::Applied(r) | Self::Unchanged(r) => r,
        }
    }
}

/// Sum of settled amounts; pending and failed never count
pub fn settled_total<R: LedgerRecord>(records: &[R]) -> Decimal {
    records
        .iter()
        .filter(|r| r.status() == RecordStatus::Settled)
        .map(LedgerRecord::amount)
        .sum()
}

/// Ledger storage trait
///
/// No implementation may cache status across calls; every transition is
/// decided against the stored row.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_sale(&self, sale: &Sale) -> Result<()>;

    async fn insert_withdrawal(&self, withdrawal: &Withdrawal) -> Result<()>;

    async fn get_sale(&self, id: &str) -> Result<Option<Sale>>;

    async fn get_withdrawal(&self, id: &str) -> Result<Option<Withdrawal>>;

    async fn find_sale_by_reference(&self, reference: &str) -> Result<Option<Sale>>;

    async fn find_withdrawal_by_reference(&self, reference: &str) -> Result<Option<Withdrawal>>;

    /// The pending or settled sale made from a checkout session, if any.
    ///
    /// A session carries at most one such sale; failed attempts do not count.
    async fn open_sale_for_session(&self, token: &SessionToken) -> Result<Option<Sale>>;

    /// Atomic `UPDATE ... WHERE status = 'pending'`
    async fn transition_sale(&self, id: &str, next: RecordStatus)
    -> Result<TransitionOutcome<Sale>>;

    /// Atomic `UPDATE ... WHERE status = 'pending'`
    async fn transition_withdrawal(
        &self,
        id: &str,
        next: RecordStatus,
    ) -> Result<TransitionOutcome<Withdrawal>>;

    /// All sales, newest first
    async fn sales(&self) -> Result<Vec<Sale>>;

    /// All withdrawals, newest first
    async fn withdrawals(&self) -> Result<Vec<Withdrawal>>;
}

/// One table with a unique index on the external reference
struct Table<R> {
    rows: HashMap<String, R>,
    by_reference: HashMap<String, String>,
}

impl<R: LedgerRecord> Table<R> {
    fn new() -> Self {
        Self {
            rows: HashMap::new(),
            by_reference: HashMap::new(),
        }
    }

    fn insert(&mut self, record: &R) -> Result<()> {
        if self.rows.contains_key(record.id()) {
            return Err(PaymentError::Conflict(format!(
                "{} {} already exists",
                R::KIND,
                record.id()
            )));
        }
        if let Some(reference) = record.external_reference() {
            if self.by_reference.contains_key(reference) {
                return Err(PaymentError::Conflict(format!(
                    "{} reference {reference} already recorded",
                    R::KIND
                )));
            }
            self.by_reference
                .insert(reference.to_string(), record.id().to_string());
        }
        self.rows.insert(record.id().to_string(), record.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Option<R> {
        self.rows.get(id).cloned()
    }

    fn by_reference(&self, reference: &str) -> Option<R> {
        self.by_reference
            .get(reference)
            .and_then(|id| self.rows.get(id))
            .cloned()
    }

    fn transition(&mut self, id: &str, next: RecordStatus) -> Result<TransitionOutcome<R>> {
        let row = self
            .rows
            .get_mut(id)
            .ok_or_else(|| PaymentError::RecordNotFound(format!("{} {id}", R::KIND)))?;
        if row.lifecycle_mut().transition(next)? {
            Ok(TransitionOutcome::Applied(row.clone()))
        } else {
            Ok(TransitionOutcome::Unchanged(row.clone()))
        }
    }

    fn newest_first(&self) -> Vec<R> {
        let mut all: Vec<R> = self.rows.values().cloned().collect();
        all.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().cmp(a.id()))
        });
        all
    }
}

impl Table<Sale> {
    fn open_for_session(&self, token: &SessionToken) -> Option<Sale> {
        self.rows
            .values()
            .find(|sale| {
                sale.status() != RecordStatus::Failed
                    && sale.session_token.as_ref() == Some(token)
            })
            .cloned()
    }
}

/// In-memory ledger (for development)
///
/// Each table sits behind its own lock; a transition holds the write lock
/// across check and write, which makes it the conditional update the trait
/// requires.
pub struct MemoryLedgerStore {
    sales: RwLock<Table<Sale>>,
    withdrawals: RwLock<Table<Withdrawal>>,
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            sales: RwLock::new(Table::new()),
            withdrawals: RwLock::new(Table::new()),
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert_sale(&self, sale: &Sale) -> Result<()> {
        let mut sales = self.sales.write()?;
        if let Some(token) = &sale.session_token {
            if sale.status() != RecordStatus::Failed {
                if let Some(open) = sales.open_for_session(token) {
                    return Err(PaymentError::Conflict(format!(
                        "checkout {token} already has open sale {}",
                        open.id
                    )));
                }
            }
        }
        sales.insert(sale)
    }

    async fn insert_withdrawal(&self, withdrawal: &Withdrawal) -> Result<()> {
        self.withdrawals.write()?.insert(withdrawal)
    }

    async fn get_sale(&self, id: &str) -> Result<Option<Sale>> {
        Ok(self.sales.read()?.get(id))
    }

    async fn get_withdrawal(&self, id: &str) -> Result<Option<Withdrawal>> {
        Ok(self.withdrawals.read()?.get(id))
    }

    async fn find_sale_by_reference(&self, reference: &str) -> Result<Option<Sale>> {
        Ok(self.sales.read()?.by_reference(reference))
    }

    async fn find_withdrawal_by_reference(&self, reference: &str) -> Result<Option<Withdrawal>> {
        Ok(self.withdrawals.read()?.by_reference(reference))
    }

    async fn open_sale_for_session(&self, token: &SessionToken) -> Result<Option<Sale>> {
        Ok(self.sales.read()?.open_for_session(token))
    }

    async fn transition_sale(
        &self,
        id: &str,
        next: RecordStatus,
    ) -> Result<TransitionOutcome<Sale>> {
        self.sales.write()?.transition(id, next)
    }

    async fn transition_withdrawal(
        &self,
        id: &str,
        next: RecordStatus,
    ) -> Result<TransitionOutcome<Withdrawal>> {
        self.withdrawals.write()?.transition(id, next)
    }

    async fn sales(&self) -> Result<Vec<Sale>> {
        Ok(self.sales.read()?.newest_first())
    }

    async fn withdrawals(&self) -> Result<Vec<Withdrawal>> {
        Ok(self.withdrawals.read()?.newest_first())
    }
}
