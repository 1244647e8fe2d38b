//! Order intake. The ledger records intents only; matching, fills and expiry
//! belong to an external process and are deliberately absent here.

use crate::error::LedgerError;
use crate::id::LedgerId;
use crate::ledger_traits::{OrderBook, OrderFilter};
use crate::model::{decimal_to_text, InvestmentStatus, Order, OrderSide, OrderStatus};
use crate::sqlite::{order_from_row, units_to_i64, unix_now, SqliteLedger};
use rust_decimal::Decimal;
use sqlx::Row;

const ORDER_COLUMNS: &str = "order_id, holder_id, asset_id, side, limit_price, \
                             units_requested, units_filled, status, unverified_holding, created_at";

impl SqliteLedger {
    /// Units of the asset the holder currently holds through active
    /// investments. The mirror cannot see holdings acquired purely on-chain,
    /// so a shortfall is advisory, not authoritative.
    async fn mirrored_holdings(
        &self,
        holder_id: &LedgerId,
        asset_id: &LedgerId,
    ) -> Result<u64, LedgerError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(units_held), 0) AS held
             FROM investments WHERE holder_id = ? AND asset_id = ? AND status = ?",
        )
        .bind(holder_id.as_bytes())
        .bind(asset_id.as_bytes())
        .bind(InvestmentStatus::Active.as_int())
        .fetch_one(self.pool())
        .await?;
        Ok(row.try_get::<i64, _>("held")? as u64)
    }

    async fn fetch_order(&self, order_id: &LedgerId) -> Result<Option<Order>, LedgerError> {
        let sql = format!("SELECT {} FROM orders WHERE order_id = ?", ORDER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(order_id.as_bytes())
            .fetch_optional(self.pool())
            .await?;

        row.map(|r| order_from_row(&r)).transpose()
    }
}

impl OrderBook for SqliteLedger {
    fn place_order(
        &self,
        holder_id: &LedgerId,
        asset_id: &LedgerId,
        side: OrderSide,
        limit_price: Decimal,
        units_requested: u64,
    ) -> Result<Order, LedgerError> {
        self.block_on(async {
            if self.fetch_asset(asset_id).await?.is_none() {
                return Err(LedgerError::NotFound(format!("asset {}", asset_id)));
            }

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
            if limit_price <= Decimal::ZERO {
                return Err(LedgerError::Validation(
                    "limit price must be positive".to_string(),
                ));
            }
            let units_column = units_to_i64(units_requested)?;

            let unverified_holding = match side {
                OrderSide::Buy => false,
                OrderSide::Sell => {
                    self.mirrored_holdings(holder_id, asset_id).await? < units_requested
                }
            };

            let created_at = unix_now();
            let order = Order {
                order_id: LedgerId::derive(&[
                    b"order",
                    holder_id.as_bytes(),
                    asset_id.as_bytes(),
                    &created_at.to_le_bytes(),
                    &units_requested.to_le_bytes(),
                    &[side.as_int() as u8],
                ]),
                holder_id: *holder_id,
                asset_id: *asset_id,
                side,
                limit_price,
                units_requested,
                units_filled: 0,
                status: OrderStatus::Open,
                unverified_holding,
                created_at,
            };

            sqlx::query(
                "INSERT INTO orders (order_id, holder_id, asset_id, side, limit_price,
                                     units_requested, units_filled, status, unverified_holding, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(order.order_id.as_bytes())
            .bind(order.holder_id.as_bytes())
            .bind(order.asset_id.as_bytes())
            .bind(order.side.as_int())
            .bind(decimal_to_text(&order.limit_price))
            .bind(units_column)
            .bind(order.units_filled as i64)
            .bind(order.status.as_int())
            .bind(order.unverified_holding as i64)
            .bind(order.created_at)
            .execute(self.pool())
            .await?;

            Ok(order)
        })
    }

    fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, LedgerError> {
        self.block_on(async {
            // The SQL is derived from the immutable filter in one pass
            let mut clauses = Vec::new();
            if filter.asset_id.is_some() {
                clauses.push("asset_id = ?");
            }
            if filter.side.is_some() {
                clauses.push("side = ?");
            }
            if filter.status.is_some() {
                clauses.push("status = ?");
            }

            let mut sql = format!("SELECT {} FROM orders", ORDER_COLUMNS);
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY created_at ASC, order_id ASC");

            let mut query = sqlx::query(&sql);
            if let Some(asset_id) = &filter.asset_id {
                query = query.bind(asset_id.as_bytes());
            }
            if let Some(side) = filter.side {
                query = query.bind(side.as_int());
            }
            if let Some(status) = filter.status {
                query = query.bind(status.as_int());
            }

            let rows = query.fetch_all(self.pool()).await?;
            rows.iter().map(order_from_row).collect()
        })
    }

    fn cancel_order(
        &self,
        holder_id: &LedgerId,
        order_id: &LedgerId,
    ) -> Result<Order, LedgerError> {
        self.block_on(async {
            let order = self
                .fetch_order(order_id)
                .await?
                .ok_or_else(|| LedgerError::NotFound(format!("order {}", order_id)))?;

            if order.holder_id != *holder_id {
                return Err(LedgerError::Forbidden(format!(
                    "order {} belongs to another holder",
                    order_id
                )));
            }

            let result = sqlx::query(
                "UPDATE orders SET status = ? WHERE order_id = ? AND status = ?",
            )
            .bind(OrderStatus::Cancelled.as_int())
            .bind(order_id.as_bytes())
            .bind(OrderStatus::Open.as_int())
            .execute(self.pool())
            .await?;

            if result.rows_affected() == 0 {
                return Err(LedgerError::Validation(format!(
                    "order {} is not open",
                    order_id
                )));
            }

            Ok(Order {
                status: OrderStatus::Cancelled,
                ..order
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::tests::unique_id;
    use crate::ledger_traits::{AssetCatalog, InvestmentRecorder};
    use crate::model::ComplianceStatus;
    use crate::sqlite::test_util::*;

    #[test]
    fn test_place_order_unknown_asset_creates_nothing() {
        let (_dir, ledger) = temp_ledger();
        let holder = seed_holder(&ledger, ComplianceStatus::Verified);

        let err = ledger
            .place_order(&holder, &unique_id(), OrderSide::Buy, Decimal::ONE, 10)
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));

        let all = ledger.list_orders(&OrderFilter::default()).unwrap();
        assert!(all.is_empty());
    }

    #[test]
    fn test_place_order_requires_verified_holder() {
        let (_dir, ledger) = temp_ledger();
        let asset = seed_asset(&ledger, 1000, Decimal::ONE, 1);
        let holder = seed_holder(&ledger, ComplianceStatus::Rejected);

        let err = ledger
            .place_order(&holder, &asset.asset_id, OrderSide::Buy, Decimal::ONE, 10)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Ineligible(_)));
    }

    #[test]
    fn test_place_order_validation() {
        let (_dir, ledger) = temp_ledger();
        let asset = seed_asset(&ledger, 1000, Decimal::ONE, 1);
        let holder = seed_holder(&ledger, ComplianceStatus::Verified);

        let zero_units = ledger.place_order(&holder, &asset.asset_id, OrderSide::Buy, Decimal::ONE, 0);
        assert!(matches!(zero_units, Err(LedgerError::Validation(_))));

        let free = ledger.place_order(&holder, &asset.asset_id, OrderSide::Buy, Decimal::ZERO, 10);
        assert!(matches!(free, Err(LedgerError::Validation(_))));

        let oversized =
            ledger.place_order(&holder, &asset.asset_id, OrderSide::Buy, Decimal::ONE, u64::MAX);
        assert!(matches!(oversized, Err(LedgerError::Validation(_))));
        assert!(ledger.list_orders(&OrderFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_buy_order_is_never_flagged() {
        let (_dir, ledger) = temp_ledger();
        let asset = seed_asset(&ledger, 1000, Decimal::ONE, 1);
        let holder = seed_holder(&ledger, ComplianceStatus::Verified);

        let order = ledger
            .place_order(&holder, &asset.asset_id, OrderSide::Buy, Decimal::new(150, 2), 100)
            .unwrap();
        assert_eq!(order.status, OrderStatus::Open);
        assert!(!order.unverified_holding);
        assert_eq!(order.units_filled, 0);
    }

    #[test]
    fn test_sell_order_flagged_when_mirror_cannot_cover() {
        let (_dir, ledger) = temp_ledger();
        let asset = seed_asset(&ledger, 1000, Decimal::ONE, 1);
        let holder = seed_holder(&ledger, ComplianceStatus::Verified);
        let admin = seed_admin(&ledger);

        // 100 active units in the mirror
        let investment = ledger
            .create_investment(&holder, &asset.asset_id, Decimal::from(100u64), 100)
            .unwrap();
        ledger
            .activate_investment(&admin, &investment.investment_id)
            .unwrap();

        let covered = ledger
            .place_order(&holder, &asset.asset_id, OrderSide::Sell, Decimal::ONE, 80)
            .unwrap();
        assert!(!covered.unverified_holding);

        let flagged = ledger
            .place_order(&holder, &asset.asset_id, OrderSide::Sell, Decimal::ONE, 150)
            .unwrap();
        assert!(flagged.unverified_holding);
        assert_eq!(flagged.status, OrderStatus::Open);
    }

    #[test]
    fn test_pending_investments_do_not_back_sell_orders() {
        let (_dir, ledger) = temp_ledger();
        let asset = seed_asset(&ledger, 1000, Decimal::ONE, 1);
        let holder = seed_holder(&ledger, ComplianceStatus::Verified);

        // Pending, never activated
        ledger
            .create_investment(&holder, &asset.asset_id, Decimal::from(100u64), 100)
            .unwrap();

        let order = ledger
            .place_order(&holder, &asset.asset_id, OrderSide::Sell, Decimal::ONE, 50)
            .unwrap();
        assert!(order.unverified_holding);
    }

    #[test]
    fn test_list_orders_filter_and_ordering() {
        let (_dir, ledger) = temp_ledger();
        let asset = seed_asset(&ledger, 1000, Decimal::ONE, 1);
        let other_asset = seed_asset(&ledger, 1000, Decimal::ONE, 1);
        let holder = seed_holder(&ledger, ComplianceStatus::Verified);

        let first = ledger
            .place_order(&holder, &asset.asset_id, OrderSide::Buy, Decimal::ONE, 10)
            .unwrap();
        let second = ledger
            .place_order(&holder, &asset.asset_id, OrderSide::Sell, Decimal::ONE, 20)
            .unwrap();
        ledger
            .place_order(&holder, &other_asset.asset_id, OrderSide::Buy, Decimal::ONE, 30)
            .unwrap();

        let open = ledger
            .list_orders(&OrderFilter::open_for_asset(asset.asset_id))
            .unwrap();
        assert_eq!(open.len(), 2);
        // Creation order, ties broken by order id
        assert!(
            (open[0].created_at, open[0].order_id) <= (open[1].created_at, open[1].order_id)
        );

        let buys = ledger
            .list_orders(&OrderFilter {
                asset_id: Some(asset.asset_id),
                side: Some(OrderSide::Buy),
                status: None,
            })
            .unwrap();
        assert_eq!(buys.len(), 1);
        assert_eq!(buys[0].order_id, first.order_id);

        // Cancelled orders drop out of the open view
        ledger.cancel_order(&holder, &second.order_id).unwrap();
        let open_after = ledger
            .list_orders(&OrderFilter::open_for_asset(asset.asset_id))
            .unwrap();
        assert_eq!(open_after.len(), 1);
        assert_eq!(open_after[0].order_id, first.order_id);
    }

    #[test]
    fn test_cancel_order_only_by_owner_and_only_open() {
        let (_dir, ledger) = temp_ledger();
        let asset = seed_asset(&ledger, 1000, Decimal::ONE, 1);
        let holder = seed_holder(&ledger, ComplianceStatus::Verified);
        let stranger = seed_holder(&ledger, ComplianceStatus::Verified);

        let order = ledger
            .place_order(&holder, &asset.asset_id, OrderSide::Buy, Decimal::ONE, 10)
            .unwrap();

        let denied = ledger.cancel_order(&stranger, &order.order_id);
        assert!(matches!(denied, Err(LedgerError::Forbidden(_))));

        let cancelled = ledger.cancel_order(&holder, &order.order_id).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let again = ledger.cancel_order(&holder, &order.order_id);
        assert!(matches!(again, Err(LedgerError::Validation(_))));

        let missing = ledger.cancel_order(&holder, &unique_id());
        assert!(matches!(missing, Err(LedgerError::NotFound(_))));
    }
}
