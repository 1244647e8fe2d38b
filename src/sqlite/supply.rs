//! Supply accounting: the only writer of `available_supply`.
//!
//! The check-and-decrement is a single conditional `UPDATE`, so two
//! concurrent reservations can never interleave between the read and the
//! write. Every transaction here leads with a write statement; SQLite then
//! serializes writers instead of failing a read-to-write lock upgrade.

use crate::error::LedgerError;
use crate::id::LedgerId;
use crate::ledger_traits::{Reservation, SupplyReconciliation, TokenSupplyLedger};
use crate::model::InvestmentStatus;
use crate::sqlite::{units_to_i64, SqliteLedger};
use log::warn;
use sqlx::{Row, Sqlite, Transaction};

impl SqliteLedger {
    /// Conditionally decrement available supply inside an open transaction.
    /// Returns the remaining supply after the decrement.
    pub(crate) async fn reserve_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        asset_id: &LedgerId,
        units: u64,
    ) -> Result<u64, LedgerError> {
        let decrement = units_to_i64(units)?;
        let result = sqlx::query(
            "UPDATE assets
             SET available_supply = available_supply - ?
             WHERE asset_id = ? AND available_supply >= ?",
        )
        .bind(decrement)
        .bind(asset_id.as_bytes())
        .bind(decrement)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a missing asset from an undersupplied one
            let row = sqlx::query("SELECT available_supply FROM assets WHERE asset_id = ?")
                .bind(asset_id.as_bytes())
                .fetch_optional(&mut **tx)
                .await?;

            return match row {
                Some(row) => Err(LedgerError::InsufficientSupply {
                    asset_id: *asset_id,
                    requested: units,
                    available: row.try_get::<i64, _>("available_supply")? as u64,
                }),
                None => Err(LedgerError::NotFound(format!("asset {}", asset_id))),
            };
        }

        let row = sqlx::query("SELECT available_supply FROM assets WHERE asset_id = ?")
            .bind(asset_id.as_bytes())
            .fetch_one(&mut **tx)
            .await?;
        Ok(row.try_get::<i64, _>("available_supply")? as u64)
    }

    /// Return units to available supply inside an open transaction, clamped
    /// at total supply. A clamp means more units came back than ever left,
    /// which is an invariant violation worth flagging, not a crash.
    pub(crate) async fn release_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        asset_id: &LedgerId,
        units: u64,
    ) -> Result<(), LedgerError> {
        let increment = units_to_i64(units)?;
        let result = sqlx::query(
            "UPDATE assets
             SET available_supply = available_supply + ?
             WHERE asset_id = ? AND available_supply + ? <= total_supply",
        )
        .bind(increment)
        .bind(asset_id.as_bytes())
        .bind(increment)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let exists = sqlx::query("SELECT 1 FROM assets WHERE asset_id = ?")
            .bind(asset_id.as_bytes())
            .fetch_optional(&mut **tx)
            .await?
            .is_some();
        if !exists {
            return Err(LedgerError::NotFound(format!("asset {}", asset_id)));
        }

        warn!(
            "release of {} units on asset {} would exceed total supply; clamping",
            units, asset_id
        );
        sqlx::query("UPDATE assets SET available_supply = total_supply WHERE asset_id = ?")
            .bind(asset_id.as_bytes())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

impl TokenSupplyLedger for SqliteLedger {
    fn reserve(&self, asset_id: &LedgerId, units: u64) -> Result<Reservation, LedgerError> {
        if units == 0 {
            return Err(LedgerError::Validation(
                "cannot reserve zero units".to_string(),
            ));
        }

        self.block_on(async {
            let mut tx = self.pool().begin().await?;
            let remaining_supply = self.reserve_in_tx(&mut tx, asset_id, units).await?;
            tx.commit().await?;

            Ok(Reservation {
                asset_id: *asset_id,
                units,
                remaining_supply,
            })
        })
    }

    fn release(&self, asset_id: &LedgerId, units: u64) -> Result<(), LedgerError> {
        if units == 0 {
            return Err(LedgerError::Validation(
                "cannot release zero units".to_string(),
            ));
        }

        self.block_on(async {
            let mut tx = self.pool().begin().await?;
            self.release_in_tx(&mut tx, asset_id, units).await?;
            tx.commit().await?;
            Ok(())
        })
    }

    fn reconcile(&self, asset_id: &LedgerId) -> Result<SupplyReconciliation, LedgerError> {
        self.block_on(async {
            let asset = self
                .fetch_asset(asset_id)
                .await?
                .ok_or_else(|| LedgerError::NotFound(format!("asset {}", asset_id)))?;

            let row = sqlx::query(
                "SELECT COALESCE(SUM(units_held), 0) AS outstanding
                 FROM investments WHERE asset_id = ? AND status != ?",
            )
            .bind(asset_id.as_bytes())
            .bind(InvestmentStatus::Cancelled.as_int())
            .fetch_one(self.pool())
            .await?;
            let units_outstanding = row.try_get::<i64, _>("outstanding")? as u64;

            let consistent =
                asset.total_supply - asset.available_supply == units_outstanding;
            if !consistent {
                warn!(
                    "supply reconciliation mismatch on asset {}: total {} - available {} != outstanding {}",
                    asset_id, asset.total_supply, asset.available_supply, units_outstanding
                );
            }

            Ok(SupplyReconciliation {
                asset_id: *asset_id,
                total_supply: asset.total_supply,
                available_supply: asset.available_supply,
                units_outstanding,
                consistent,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::tests::unique_id;
    use crate::ledger_traits::AssetCatalog;
    use crate::sqlite::test_util::*;
    use rust_decimal::Decimal;
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_reserve_release_round_trip() {
        let (_dir, ledger) = temp_ledger();
        let asset = seed_asset(&ledger, 1000, Decimal::ONE, 1);

        let reservation = ledger.reserve(&asset.asset_id, 250).unwrap();
        assert_eq!(reservation.units, 250);
        assert_eq!(reservation.remaining_supply, 750);

        ledger.release(&asset.asset_id, 250).unwrap();
        let restored = ledger.get_asset(&asset.asset_id).unwrap().unwrap();
        assert_eq!(restored.available_supply, 1000);
    }

    #[test]
    fn test_reserve_insufficient_supply_mutates_nothing() {
        let (_dir, ledger) = temp_ledger();
        let asset = seed_asset(&ledger, 100, Decimal::ONE, 1);

        let err = ledger.reserve(&asset.asset_id, 101).unwrap_err();
        match err {
            LedgerError::InsufficientSupply {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, 101);
                assert_eq!(available, 100);
            }
            other => panic!("expected InsufficientSupply, got {:?}", other),
        }

        let unchanged = ledger.get_asset(&asset.asset_id).unwrap().unwrap();
        assert_eq!(unchanged.available_supply, 100);
    }

    #[test]
    fn test_reserve_unknown_asset() {
        let (_dir, ledger) = temp_ledger();
        let err = ledger.reserve(&unique_id(), 1).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[test]
    fn test_reserve_zero_units_rejected() {
        let (_dir, ledger) = temp_ledger();
        let asset = seed_asset(&ledger, 100, Decimal::ONE, 1);
        let err = ledger.reserve(&asset.asset_id, 0).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn test_reserve_and_release_reject_units_past_storage_bound() {
        let (_dir, ledger) = temp_ledger();
        let asset = seed_asset(&ledger, 1000, Decimal::ONE, 1);
        ledger.reserve(&asset.asset_id, 100).unwrap();

        // Counts past the i64 column range would bind negative and turn the
        // guarded decrement into an increment.
        for units in [i64::MAX as u64 + 1, u64::MAX] {
            let err = ledger.reserve(&asset.asset_id, units).unwrap_err();
            assert!(matches!(err, LedgerError::Validation(_)));
            let err = ledger.release(&asset.asset_id, units).unwrap_err();
            assert!(matches!(err, LedgerError::Validation(_)));
        }

        let unchanged = ledger.get_asset(&asset.asset_id).unwrap().unwrap();
        assert_eq!(unchanged.available_supply, 900);
    }

    #[test]
    fn test_release_clamps_at_total_supply() {
        let (_dir, ledger) = temp_ledger();
        let asset = seed_asset(&ledger, 100, Decimal::ONE, 1);

        ledger.reserve(&asset.asset_id, 10).unwrap();
        // Release more than was ever reserved
        ledger.release(&asset.asset_id, 50).unwrap();

        let clamped = ledger.get_asset(&asset.asset_id).unwrap().unwrap();
        assert_eq!(clamped.available_supply, 100);
    }

    #[test]
    fn test_concurrent_reserves_never_oversell() {
        let (_dir, ledger) = temp_ledger();
        let asset = seed_asset(&ledger, 1000, Decimal::ONE, 1);
        let ledger = Arc::new(ledger);

        let barrier = Arc::new(Barrier::new(2));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let ledger = Arc::clone(&ledger);
            let barrier = Arc::clone(&barrier);
            let asset_id = asset.asset_id;
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                ledger.reserve(&asset_id, 600)
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let insufficient = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::InsufficientSupply { .. })))
            .count();

        // Exactly one of the two 600-unit reservations can be backed by the
        // 1000 available units.
        assert_eq!(successes, 1);
        assert_eq!(insufficient, 1);

        let final_asset = ledger.get_asset(&asset.asset_id).unwrap().unwrap();
        assert_eq!(final_asset.available_supply, 400);
    }

    #[test]
    fn test_many_concurrent_reserves_sum_within_supply() {
        let (_dir, ledger) = temp_ledger();
        let asset = seed_asset(&ledger, 100, Decimal::ONE, 1);
        let ledger = Arc::new(ledger);

        let barrier = Arc::new(Barrier::new(8));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = Arc::clone(&ledger);
            let barrier = Arc::clone(&barrier);
            let asset_id = asset.asset_id;
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                ledger.reserve(&asset_id, 30)
            }));
        }

        let reserved: u64 = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter_map(|r| r.ok())
            .map(|reservation| reservation.units)
            .sum();

        assert!(reserved <= 100);
        let final_asset = ledger.get_asset(&asset.asset_id).unwrap().unwrap();
        assert_eq!(final_asset.available_supply, 100 - reserved);
    }

    #[test]
    fn test_reconcile_clean_ledger() {
        let (_dir, ledger) = temp_ledger();
        let asset = seed_asset(&ledger, 500, Decimal::ONE, 1);

        let report = ledger.reconcile(&asset.asset_id).unwrap();
        assert!(report.consistent);
        assert_eq!(report.units_outstanding, 0);
        assert_eq!(report.available_supply, 500);
    }

    #[test]
    fn test_reconcile_detects_bare_reservation() {
        let (_dir, ledger) = temp_ledger();
        let asset = seed_asset(&ledger, 500, Decimal::ONE, 1);

        // A reservation without an investment row is exactly the corruption
        // the audit exists to surface.
        ledger.reserve(&asset.asset_id, 100).unwrap();

        let report = ledger.reconcile(&asset.asset_id).unwrap();
        assert!(!report.consistent);
        assert_eq!(report.units_outstanding, 0);
        assert_eq!(report.available_supply, 400);
    }
}
