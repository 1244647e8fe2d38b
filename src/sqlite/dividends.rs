//! Dividend fan-out: one payment per active investment, proportional to
//! units held, rounded half-even to the minor unit. The payment batch and the
//! `Distributed` flag commit in one transaction, and the UNIQUE
//! (dividend, investment) key makes any replay a no-op.

use crate::error::LedgerError;
use crate::id::LedgerId;
use crate::ledger_traits::{DistributionReport, DividendDistributor};
use crate::model::{
    decimal_to_text, round_to_minor_unit, Dividend, DividendPayment, DividendStatus, NewDividend,
};
use crate::sqlite::{
    asset_from_row, dividend_from_row, investment_from_row, payment_from_row, unix_now,
    SqliteLedger,
};
use log::{debug, warn};
use rust_decimal::Decimal;
use sqlx::error::DatabaseError;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed"))
}

impl SqliteLedger {
    async fn fetch_dividend(
        &self,
        dividend_id: &LedgerId,
    ) -> Result<Option<Dividend>, LedgerError> {
        let row = sqlx::query(
            "SELECT dividend_id, asset_id, total_amount, distribution_date,
                    description, status, created_at
             FROM dividends WHERE dividend_id = ?",
        )
        .bind(dividend_id.as_bytes())
        .fetch_optional(self.pool())
        .await?;

        row.map(|r| dividend_from_row(&r)).transpose()
    }
}

impl DividendDistributor for SqliteLedger {
    fn schedule_dividend(
        &self,
        admin_id: &LedgerId,
        new_dividend: NewDividend,
    ) -> Result<Dividend, LedgerError> {
        self.block_on(async {
            self.require_admin(admin_id).await?;

            if new_dividend.total_amount <= Decimal::ZERO {
                return Err(LedgerError::Validation(
                    "dividend amount must be positive".to_string(),
                ));
            }
            if self.fetch_asset(&new_dividend.asset_id).await?.is_none() {
                return Err(LedgerError::NotFound(format!(
                    "asset {}",
                    new_dividend.asset_id
                )));
            }

            let created_at = unix_now();
            let dividend = Dividend {
                dividend_id: LedgerId::derive(&[
                    b"dividend",
                    new_dividend.asset_id.as_bytes(),
                    &new_dividend.distribution_date.to_le_bytes(),
                    &created_at.to_le_bytes(),
                    new_dividend.description.as_bytes(),
                ]),
                asset_id: new_dividend.asset_id,
                total_amount: new_dividend.total_amount,
                distribution_date: new_dividend.distribution_date,
                description: new_dividend.description,
                status: DividendStatus::Scheduled,
                created_at,
            };

            sqlx::query(
                "INSERT INTO dividends (dividend_id, asset_id, total_amount, distribution_date,
                                        description, status, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(dividend.dividend_id.as_bytes())
            .bind(dividend.asset_id.as_bytes())
            .bind(decimal_to_text(&dividend.total_amount))
            .bind(dividend.distribution_date)
            .bind(&dividend.description)
            .bind(dividend.status.as_int())
            .bind(dividend.created_at)
            .execute(self.pool())
            .await?;

            Ok(dividend)
        })
    }

    fn distribute(&self, dividend_id: &LedgerId) -> Result<DistributionReport, LedgerError> {
        self.block_on(async {
            // The whole fan-out is one transaction, and the status flip is
            // its leading write: a concurrent distribute or a cancel of one
            // of the investments serializes entirely before or after it,
            // never between the enumeration and the payment batch.
            let mut tx = self.pool().begin().await?;
            let flipped = sqlx::query(
                "UPDATE dividends SET status = ? WHERE dividend_id = ? AND status = ?",
            )
            .bind(DividendStatus::Distributed.as_int())
            .bind(dividend_id.as_bytes())
            .bind(DividendStatus::Scheduled.as_int())
            .execute(&mut *tx)
            .await?;
            if flipped.rows_affected() == 0 {
                let exists = sqlx::query("SELECT 1 FROM dividends WHERE dividend_id = ?")
                    .bind(dividend_id.as_bytes())
                    .fetch_optional(&mut *tx)
                    .await?
                    .is_some();
                return match exists {
                    true => Err(LedgerError::AlreadyDistributed(*dividend_id)),
                    false => Err(LedgerError::NotFound(format!("dividend {}", dividend_id))),
                };
            }

            let row = sqlx::query(
                "SELECT dividend_id, asset_id, total_amount, distribution_date,
                        description, status, created_at
                 FROM dividends WHERE dividend_id = ?",
            )
            .bind(dividend_id.as_bytes())
            .fetch_one(&mut *tx)
            .await?;
            let dividend = dividend_from_row(&row)?;

            let asset = sqlx::query(
                "SELECT asset_id, name, total_supply, available_supply, unit_price,
                        min_investment_units, status, created_at
                 FROM assets WHERE asset_id = ?",
            )
            .bind(dividend.asset_id.as_bytes())
            .fetch_optional(&mut *tx)
            .await?
            .map(|r| asset_from_row(&r))
            .transpose()?
            .ok_or_else(|| LedgerError::NotFound(format!("asset {}", dividend.asset_id)))?;

            // Deterministic enumeration so retries compute identical payments
            let rows = sqlx::query(
                "SELECT investment_id, holder_id, asset_id, units_held, amount_paid, status, created_at
                 FROM investments
                 WHERE asset_id = ? AND status = ?
                 ORDER BY created_at ASC, investment_id ASC",
            )
            .bind(dividend.asset_id.as_bytes())
            .bind(crate::model::InvestmentStatus::Active.as_int())
            .fetch_all(&mut *tx)
            .await?;
            let investments = rows
                .iter()
                .map(investment_from_row)
                .collect::<Result<Vec<_>, _>>()?;

            let paid_at = unix_now();
            let total_supply = Decimal::from(asset.total_supply);
            let mut pool_left = dividend.total_amount;
            let mut payments = Vec::with_capacity(investments.len());
            for investment in &investments {
                let share = Decimal::from(investment.units_held) / total_supply;
                let rounded = round_to_minor_unit(dividend.total_amount * share);
                // Half-even rounding can overshoot the pool by fractions of a
                // cent across a batch; cap so holders are never overpaid in
                // aggregate.
                let amount = rounded.min(pool_left);
                pool_left -= amount;

                payments.push(DividendPayment {
                    payment_id: LedgerId::for_payment(dividend_id, &investment.investment_id),
                    dividend_id: *dividend_id,
                    investment_id: investment.investment_id,
                    holder_id: investment.holder_id,
                    amount,
                    paid_at,
                });
            }

            for payment in &payments {
                let inserted = sqlx::query(
                    "INSERT INTO dividend_payments (payment_id, dividend_id, investment_id,
                                                    holder_id, amount, paid_at)
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(payment.payment_id.as_bytes())
                .bind(payment.dividend_id.as_bytes())
                .bind(payment.investment_id.as_bytes())
                .bind(payment.holder_id.as_bytes())
                .bind(decimal_to_text(&payment.amount))
                .bind(payment.paid_at)
                .execute(&mut *tx)
                .await;

                if let Err(err) = inserted {
                    // A payment row for this (dividend, investment) pair
                    // already exists, which the status gate should have
                    // caught; surface it as a replay rather than corrupting
                    // the batch.
                    if is_unique_violation(&err) {
                        return Err(LedgerError::AlreadyDistributed(*dividend_id));
                    }
                    return Err(err.into());
                }
            }

            tx.commit().await?;

            let total_paid = dividend.total_amount - pool_left;
            if pool_left > Decimal::ZERO {
                debug!(
                    "dividend {} retained rounding remainder {}",
                    dividend_id, pool_left
                );
            }
            if pool_left < Decimal::ZERO {
                // Unreachable while payments are capped at the pool
                warn!(
                    "dividend {} overpaid by {}: conservation invariant violated",
                    dividend_id, -pool_left
                );
            }

            Ok(DistributionReport {
                dividend_id: *dividend_id,
                payments_created: payments.len(),
                total_paid,
                remainder: pool_left,
            })
        })
    }

    fn get_dividend(&self, dividend_id: &LedgerId) -> Result<Option<Dividend>, LedgerError> {
        self.block_on(self.fetch_dividend(dividend_id))
    }

    fn list_payments_for_dividend(
        &self,
        dividend_id: &LedgerId,
    ) -> Result<Vec<DividendPayment>, LedgerError> {
        self.block_on(async {
            let rows = sqlx::query(
                "SELECT payment_id, dividend_id, investment_id, holder_id, amount, paid_at
                 FROM dividend_payments WHERE dividend_id = ?
                 ORDER BY paid_at ASC, payment_id ASC",
            )
            .bind(dividend_id.as_bytes())
            .fetch_all(self.pool())
            .await?;

            rows.iter().map(payment_from_row).collect()
        })
    }

    fn list_payments_for_holder(
        &self,
        holder_id: &LedgerId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DividendPayment>, LedgerError> {
        if limit < 0 || offset < 0 {
            return Err(LedgerError::Validation(
                "limit and offset must be non-negative".to_string(),
            ));
        }

        self.block_on(async {
            let rows = sqlx::query(
                "SELECT payment_id, dividend_id, investment_id, holder_id, amount, paid_at
                 FROM dividend_payments WHERE holder_id = ?
                 ORDER BY paid_at DESC, payment_id ASC
                 LIMIT ? OFFSET ?",
            )
            .bind(holder_id.as_bytes())
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await?;

            rows.iter().map(payment_from_row).collect()
        })
    }
}
