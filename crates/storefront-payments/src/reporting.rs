//! Balance and Dashboard Projection
//!
//! Everything here is derived from the ledger on demand; nothing is cached
//! between requests. Only settled records count towards money figures.
//! Sales are bucketed by creation time, with UTC day boundaries.

use chrono::{DateTime, Days, NaiveDate, Timelike, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::Result;
use crate::ledger::{LedgerRecord, LedgerStore, RecordStatus, Sale, Withdrawal, settled_total};

/// Settled sales minus settled withdrawals
pub async fn current_balance(ledger: &dyn LedgerStore) -> Result<Decimal> {
    let sales = ledger.sales().await?;
    let withdrawals = ledger.withdrawals().await?;
    Ok(settled_total(&sales) - settled_total(&withdrawals))
}

/// One chart bar
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RevenueBucket {
    pub label: String,
    pub revenue: Decimal,
    pub sales: usize,
}

impl RevenueBucket {
    fn empty(label: String) -> Self {
        Self {
            label,
            revenue: Decimal::ZERO,
            sales: 0,
        }
    }

    fn add(&mut self, amount: Decimal) {
        self.revenue += amount;
        self.sales += 1;
    }
}

/// Merchant dashboard figures
#[derive(Clone, Debug, Serialize)]
pub struct DashboardSummary {
    pub balance: Decimal,
    pub total_revenue: Decimal,
    pub total_withdrawn: Decimal,
    pub revenue_today: Decimal,
    pub revenue_yesterday: Decimal,
    /// Today plus the six days before
    pub revenue_7d: Decimal,
    pub revenue_30d: Decimal,
    pub settled_sales: usize,
    pub pending_sales: usize,
    pub failed_sales: usize,
    pub daily_7d: Vec<RevenueBucket>,
    pub daily_30d: Vec<RevenueBucket>,
    pub hourly_today: Vec<RevenueBucket>,
    pub hourly_yesterday: Vec<RevenueBucket>,
}

fn daily_buckets(today: NaiveDate, days: u64) -> Vec<(NaiveDate, RevenueBucket)> {
    (0..days)
        .rev()
        .filter_map(|back| today.checked_sub_days(Days::new(back)))
        .map(|day| (day, RevenueBucket::empty(day.format("%-d/%-m").to_string())))
        .collect()
}

fn hourly_buckets() -> Vec<RevenueBucket> {
    (0..24).map(|h| RevenueBucket::empty(format!("{h}h"))).collect()
}

impl DashboardSummary {
    /// Summary of the whole ledger as of now
    pub async fn snapshot(ledger: &dyn LedgerStore) -> Result<Self> {
        let sales = ledger.sales().await?;
        let withdrawals = ledger.withdrawals().await?;
        Ok(Self::compute(&sales, &withdrawals, Utc::now()))
    }

    pub fn compute(sales: &[Sale], withdrawals: &[Withdrawal], now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        let yesterday = today.pred_opt().unwrap_or(today);

        let total_revenue = settled_total(sales);
        let total_withdrawn = settled_total(withdrawals);

        let mut summary = Self {
            balance: total_revenue - total_withdrawn,
            total_revenue,
            total_withdrawn,
            revenue_today: Decimal::ZERO,
            revenue_yesterday: Decimal::ZERO,
            revenue_7d: Decimal::ZERO,
            revenue_30d: Decimal::ZERO,
            settled_sales: 0,
            pending_sales: 0,
            failed_sales: 0,
            daily_7d: Vec::new(),
            daily_30d: Vec::new(),
            hourly_today: hourly_buckets(),
            hourly_yesterday: hourly_buckets(),
        };
        let mut daily_7d = daily_buckets(today, 7);
        let mut daily_30d = daily_buckets(today, 30);

        for sale in sales {
            match sale.status() {
                RecordStatus::Pending => summary.pending_sales += 1,
                RecordStatus::Failed => summary.failed_sales += 1,
                RecordStatus::Settled => summary.settled_sales += 1,
            }
            if sale.status() != RecordStatus::Settled {
                continue;
            }

            let created = LedgerRecord::created_at(sale);
            let day = created.date_naive();
            let hour = created.hour() as usize;
            let age = (today - day).num_days();

            if day == today {
                summary.revenue_today += sale.amount;
                summary.hourly_today[hour].add(sale.amount);
            } else if day == yesterday {
                summary.revenue_yesterday += sale.amount;
                summary.hourly_yesterday[hour].add(sale.amount);
            }
            if (0..7).contains(&age) {
                summary.revenue_7d += sale.amount;
            }
            if (0..30).contains(&age) {
                summary.revenue_30d += sale.amount;
            }

            for (bucket_day, bucket) in daily_7d.iter_mut().chain(daily_30d.iter_mut()) {
                if *bucket_day == day {
                    bucket.add(sale.amount);
                }
            }
        }

        summary.daily_7d = daily_7d.into_iter().map(|(_, b)| b).collect();
        summary.daily_30d = daily_30d.into_iter().map(|(_, b)| b).collect();
        summary
    }
}
