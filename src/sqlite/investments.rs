//! Investment intake: compliance-gated, minimum-checked, and backed by a
//! supply reservation that commits in the same transaction as the row.

use crate::error::LedgerError;
use crate::id::LedgerId;
use crate::ledger_traits::InvestmentRecorder;
use crate::model::{decimal_to_text, Investment, InvestmentStatus};
use crate::sqlite::{investment_from_row, units_to_i64, unix_now, SqliteLedger};
use rust_decimal::Decimal;

impl SqliteLedger {
    pub(crate) async fn fetch_investment(
        &self,
        investment_id: &LedgerId,
    ) -> Result<Option<Investment>, LedgerError> {
        let row = sqlx::query(
            "SELECT investment_id, holder_id, asset_id, units_held, amount_paid, status, created_at
             FROM investments WHERE investment_id = ?",
        )
        .bind(investment_id.as_bytes())
        .fetch_optional(self.pool())
        .await?;

        row.map(|r| investment_from_row(&r)).transpose()
    }
}

impl InvestmentRecorder for SqliteLedger {
    fn create_investment(
        &self,
        holder_id: &LedgerId,
        asset_id: &LedgerId,
        amount_paid: Decimal,
        units_requested: u64,
    ) -> Result<Investment, LedgerError> {
        self.block_on(async {
            // All validation happens before any mutation.
            let asset = self
                .fetch_asset(asset_id)
                .await?
                .filter(|asset| asset.status == crate::model::AssetStatus::Active)
                .ok_or_else(|| {
                    LedgerError::NotFound(format!("no active asset {}", asset_id))
                })?;

            if !self.holder_is_verified(holder_id).await? {
                return Err(LedgerError::Ineligible(format!(
                    "holder {} is not KYC-verified",
                    holder_id
                )));
            }

            if units_requested == 0 {
                return Err(LedgerError::Validation(
                    "units requested must be positive".to_string(),
                ));
            }
            let units_held = units_to_i64(units_requested)?;
            let minimum = Decimal::from(asset.min_investment_units) * asset.unit_price;
            if amount_paid < minimum {
                return Err(LedgerError::Validation(format!(
                    "amount {} is below the minimum investment of {}",
                    amount_paid, minimum
                )));
            }

            let created_at = unix_now();
            let investment = Investment {
                investment_id: LedgerId::derive(&[
                    b"investment",
                    holder_id.as_bytes(),
                    asset_id.as_bytes(),
                    &created_at.to_le_bytes(),
                    &units_requested.to_le_bytes(),
                ]),
                holder_id: *holder_id,
                asset_id: *asset_id,
                units_held: units_requested,
                amount_paid,
                status: InvestmentStatus::Pending,
                created_at,
            };

            // Reservation and investment row commit or roll back together; a
            // reservation without its row is a data-corruption condition.
            let mut tx = self.pool().begin().await?;
            self.reserve_in_tx(&mut tx, asset_id, units_requested).await?;

            sqlx::query(
                "INSERT INTO investments (investment_id, holder_id, asset_id, units_held,
                                          amount_paid, status, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(investment.investment_id.as_bytes())
            .bind(investment.holder_id.as_bytes())
            .bind(investment.asset_id.as_bytes())
            .bind(units_held)
            .bind(decimal_to_text(&investment.amount_paid))
            .bind(investment.status.as_int())
            .bind(investment.created_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(investment)
        })
    }

    fn activate_investment(
        &self,
        admin_id: &LedgerId,
        investment_id: &LedgerId,
    ) -> Result<Investment, LedgerError> {
        self.block_on(async {
            self.require_admin(admin_id).await?;

            let result = sqlx::query(
                "UPDATE investments SET status = ? WHERE investment_id = ? AND status = ?",
            )
            .bind(InvestmentStatus::Active.as_int())
            .bind(investment_id.as_bytes())
            .bind(InvestmentStatus::Pending.as_int())
            .execute(self.pool())
            .await?;

            if result.rows_affected() == 0 {
                return match self.fetch_investment(investment_id).await? {
                    Some(investment) => Err(LedgerError::Validation(format!(
                        "investment {} is not pending (status {:?})",
                        investment_id, investment.status
                    ))),
                    None => Err(LedgerError::NotFound(format!(
                        "investment {}",
                        investment_id
                    ))),
                };
            }

            self.fetch_investment(investment_id)
                .await?
                .ok_or_else(|| LedgerError::NotFound(format!("investment {}", investment_id)))
        })
    }

    fn cancel_investment(&self, investment_id: &LedgerId) -> Result<Investment, LedgerError> {
        self.block_on(async {
            let investment = self
                .fetch_investment(investment_id)
                .await?
                .ok_or_else(|| LedgerError::NotFound(format!("investment {}", investment_id)))?;

            if investment.status == InvestmentStatus::Cancelled {
                return Err(LedgerError::Validation(format!(
                    "investment {} is already cancelled",
                    investment_id
                )));
            }

            // The status flip guards the release: if another caller cancelled
            // in between, zero rows match and no units are returned twice.
            let mut tx = self.pool().begin().await?;
            let result = sqlx::query(
                "UPDATE investments SET status = ? WHERE investment_id = ? AND status != ?",
            )
            .bind(InvestmentStatus::Cancelled.as_int())
            .bind(investment_id.as_bytes())
            .bind(InvestmentStatus::Cancelled.as_int())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(LedgerError::Validation(format!(
                    "investment {} is already cancelled",
                    investment_id
                )));
            }

            self.release_in_tx(&mut tx, &investment.asset_id, investment.units_held)
                .await?;
            tx.commit().await?;

            Ok(Investment {
                status: InvestmentStatus::Cancelled,
                ..investment
            })
        })
    }

    fn get_investment(
        &self,
        investment_id: &LedgerId,
    ) -> Result<Option<Investment>, LedgerError> {
        self.block_on(self.fetch_investment(investment_id))
    }

    fn list_investments_for_holder(
        &self,
        holder_id: &LedgerId,
    ) -> Result<Vec<Investment>, LedgerError> {
        self.block_on(async {
            let rows = sqlx::query(
                "SELECT investment_id, holder_id, asset_id, units_held, amount_paid, status, created_at
                 FROM investments WHERE holder_id = ?
                 ORDER BY created_at ASC, investment_id ASC",
            )
            .bind(holder_id.as_bytes())
            .fetch_all(self.pool())
            .await?;

            rows.iter().map(investment_from_row).collect()
        })
    }
}
