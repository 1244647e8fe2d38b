//! SQLite implementation of the ledger components.
//!
//! One `SqliteLedger` implements every component trait against a single
//! database, which is what lets supply reservations and investment rows (or
//! dividend payments and the distributed flag) commit in one transaction.

mod dividends;
mod investments;
mod orders;
mod supply;

use crate::error::LedgerError;
use crate::id::LedgerId;
use crate::ledger_traits::{AssetCatalog, ComplianceGate};
use crate::model::{
    decimal_from_text, decimal_to_text, AssetStatus, ComplianceRecord, ComplianceStatus, Dividend,
    DividendPayment, DividendStatus, HolderRole, Investment, InvestmentStatus, NewAsset, Order,
    OrderSide, OrderStatus, TokenizedAsset,
};
use anyhow::Context;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow},
    Row,
};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tokio::runtime::Runtime;

/// A SQLite-backed ledger exposing a synchronous API over an internal runtime
pub struct SqliteLedger {
    pool: SqlitePool,
    rt: Arc<Runtime>,
    db_path: PathBuf,
}

impl SqliteLedger {
    /// Open (or create) a ledger database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let db_path = path.as_ref().to_path_buf();
        let db_url = format!("sqlite:{}", db_path.to_string_lossy());

        // Two workers so concurrent callers of the sync API make progress
        // independently.
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .context("failed to create runtime")?;
        let rt = Arc::new(rt);

        let options = SqliteConnectOptions::from_str(&db_url)
            .context("invalid database URL")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = rt
            .block_on(async {
                SqlitePoolOptions::new()
                    .max_connections(5)
                    .connect_with(options)
                    .await
            })
            .context("failed to connect to database")?;

        rt.block_on(Self::initialize_schema(&pool))
            .context("failed to initialize database schema")?;

        Ok(Self { pool, rt, db_path })
    }

    /// Creates the necessary tables in the database
    async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS assets (
                asset_id BLOB PRIMARY KEY,
                name TEXT NOT NULL,
                total_supply INTEGER NOT NULL,
                available_supply INTEGER NOT NULL,
                unit_price TEXT NOT NULL,
                min_investment_units INTEGER NOT NULL,
                status INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                CHECK (available_supply >= 0 AND available_supply <= total_supply)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS investments (
                investment_id BLOB PRIMARY KEY,
                holder_id BLOB NOT NULL,
                asset_id BLOB NOT NULL,
                units_held INTEGER NOT NULL,
                amount_paid TEXT NOT NULL,
                status INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (asset_id) REFERENCES assets(asset_id)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_investments_asset_status
             ON investments(asset_id, status)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_investments_holder
             ON investments(holder_id)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS orders (
                order_id BLOB PRIMARY KEY,
                holder_id BLOB NOT NULL,
                asset_id BLOB NOT NULL,
                side INTEGER NOT NULL,
                limit_price TEXT NOT NULL,
                units_requested INTEGER NOT NULL,
                units_filled INTEGER NOT NULL DEFAULT 0,
                status INTEGER NOT NULL,
                unverified_holding INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (asset_id) REFERENCES assets(asset_id)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_orders_asset_status
             ON orders(asset_id, status, created_at)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS dividends (
                dividend_id BLOB PRIMARY KEY,
                asset_id BLOB NOT NULL,
                total_amount TEXT NOT NULL,
                distribution_date INTEGER NOT NULL,
                description TEXT NOT NULL,
                status INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (asset_id) REFERENCES assets(asset_id)
            )",
        )
        .execute(pool)
        .await?;

        // The UNIQUE pair is the idempotency key of the fan-out: a retried
        // distribution cannot create a second payment for the same holder.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS dividend_payments (
                payment_id BLOB PRIMARY KEY,
                dividend_id BLOB NOT NULL,
                investment_id BLOB NOT NULL,
                holder_id BLOB NOT NULL,
                amount TEXT NOT NULL,
                paid_at INTEGER NOT NULL,
                UNIQUE (dividend_id, investment_id),
                FOREIGN KEY (dividend_id) REFERENCES dividends(dividend_id)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_dividend_payments_holder
             ON dividend_payments(holder_id, paid_at)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS compliance_records (
                holder_id BLOB PRIMARY KEY,
                status INTEGER NOT NULL,
                role INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.rt.block_on(fut)
    }

    /// Fetch an asset row, shared by every component
    pub(crate) async fn fetch_asset(
        &self,
        asset_id: &LedgerId,
    ) -> Result<Option<TokenizedAsset>, LedgerError> {
        let row = sqlx::query(
            "SELECT asset_id, name, total_supply, available_supply, unit_price,
                    min_investment_units, status, created_at
             FROM assets WHERE asset_id = ?",
        )
        .bind(asset_id.as_bytes())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| asset_from_row(&r)).transpose()
    }

    /// KYC predicate shared by the investment recorder and the order book.
    /// Missing record means not eligible, never an error.
    pub(crate) async fn holder_is_verified(
        &self,
        holder_id: &LedgerId,
    ) -> Result<bool, LedgerError> {
        let row = sqlx::query("SELECT status FROM compliance_records WHERE holder_id = ?")
            .bind(holder_id.as_bytes())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(false);
        };
        let status = ComplianceStatus::from_int(row.try_get::<i64, _>("status")?)?;
        Ok(status == ComplianceStatus::Verified)
    }

    /// Admin gate for scheduling dividends and settling investments
    pub(crate) async fn require_admin(&self, holder_id: &LedgerId) -> Result<(), LedgerError> {
        let row = sqlx::query("SELECT role FROM compliance_records WHERE holder_id = ?")
            .bind(holder_id.as_bytes())
            .fetch_optional(&self.pool)
            .await?;

        let role = match row {
            Some(row) => HolderRole::from_int(row.try_get::<i64, _>("role")?)?,
            None => {
                return Err(LedgerError::Forbidden(format!(
                    "holder {} has no record",
                    holder_id
                )))
            }
        };
        if role != HolderRole::Admin {
            return Err(LedgerError::Forbidden(format!(
                "holder {} is not an admin",
                holder_id
            )));
        }
        Ok(())
    }
}

impl AssetCatalog for SqliteLedger {
    fn tokenize_asset(&self, new_asset: NewAsset) -> Result<TokenizedAsset, LedgerError> {
        if new_asset.total_supply == 0 {
            return Err(LedgerError::Validation(
                "total supply must be positive".to_string(),
            ));
        }
        if new_asset.unit_price <= rust_decimal::Decimal::ZERO {
            return Err(LedgerError::Validation(
                "unit price must be positive".to_string(),
            ));
        }
        if new_asset.min_investment_units > new_asset.total_supply {
            return Err(LedgerError::Validation(
                "minimum investment exceeds total supply".to_string(),
            ));
        }
        let total_supply = units_to_i64(new_asset.total_supply)?;
        let min_investment_units = units_to_i64(new_asset.min_investment_units)?;

        let created_at = unix_now();
        let nonce = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_le_bytes();
        let asset = TokenizedAsset {
            asset_id: LedgerId::derive(&[b"asset", new_asset.name.as_bytes(), &nonce]),
            name: new_asset.name,
            total_supply: new_asset.total_supply,
            available_supply: new_asset.total_supply,
            unit_price: new_asset.unit_price,
            min_investment_units: new_asset.min_investment_units,
            status: AssetStatus::Active,
            created_at,
        };

        self.block_on(async {
            sqlx::query(
                "INSERT INTO assets (asset_id, name, total_supply, available_supply,
                                     unit_price, min_investment_units, status, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(asset.asset_id.as_bytes())
            .bind(&asset.name)
            .bind(total_supply)
            .bind(total_supply)
            .bind(decimal_to_text(&asset.unit_price))
            .bind(min_investment_units)
            .bind(asset.status.as_int())
            .bind(asset.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .map(|()| asset)
    }

    fn get_asset(&self, asset_id: &LedgerId) -> Result<Option<TokenizedAsset>, LedgerError> {
        self.block_on(self.fetch_asset(asset_id))
    }

    fn set_asset_status(
        &self,
        asset_id: &LedgerId,
        status: AssetStatus,
    ) -> Result<(), LedgerError> {
        self.block_on(async {
            let result = sqlx::query("UPDATE assets SET status = ? WHERE asset_id = ?")
                .bind(status.as_int())
                .bind(asset_id.as_bytes())
                .execute(&self.pool)
                .await?;

            if result.rows_affected() == 0 {
                return Err(LedgerError::NotFound(format!("asset {}", asset_id)));
            }
            Ok(())
        })
    }

    fn list_assets(&self) -> Result<Vec<TokenizedAsset>, LedgerError> {
        self.block_on(async {
            let rows = sqlx::query(
                "SELECT asset_id, name, total_supply, available_supply, unit_price,
                        min_investment_units, status, created_at
                 FROM assets ORDER BY created_at ASC, asset_id ASC",
            )
            .fetch_all(&self.pool)
            .await?;

            rows.iter().map(asset_from_row).collect()
        })
    }
}

impl ComplianceGate for SqliteLedger {
    fn is_eligible(&self, holder_id: &LedgerId, _asset_id: &LedgerId) -> Result<bool, LedgerError> {
        // Per-asset whitelisting is enforced by the on-chain layer; the
        // mirror gates on KYC status alone.
        self.block_on(self.holder_is_verified(holder_id))
    }

    fn upsert_compliance_record(&self, record: &ComplianceRecord) -> Result<(), LedgerError> {
        self.block_on(async {
            sqlx::query(
                "INSERT OR REPLACE INTO compliance_records (holder_id, status, role, updated_at)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(record.holder_id.as_bytes())
            .bind(record.status.as_int())
            .bind(record.role.as_int())
            .bind(record.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn get_compliance_record(
        &self,
        holder_id: &LedgerId,
    ) -> Result<Option<ComplianceRecord>, LedgerError> {
        self.block_on(async {
            let row = sqlx::query(
                "SELECT holder_id, status, role, updated_at
                 FROM compliance_records WHERE holder_id = ?",
            )
            .bind(holder_id.as_bytes())
            .fetch_optional(&self.pool)
            .await?;

            row.map(|r| compliance_record_from_row(&r)).transpose()
        })
    }
}

impl std::fmt::Debug for SqliteLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLedger")
            .field("db_path", &self.db_path)
            .finish()
    }
}

/// Current Unix timestamp in seconds
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Unit counts live in i64 columns; a count past that bound would bind as a
/// negative parameter and wrap the supply arithmetic.
pub(crate) fn units_to_i64(units: u64) -> Result<i64, LedgerError> {
    i64::try_from(units).map_err(|_| {
        LedgerError::Validation(format!(
            "unit count {} exceeds the supported maximum",
            units
        ))
    })
}

pub(crate) fn id_from_blob(blob: &[u8]) -> Result<LedgerId, LedgerError> {
    let bytes: [u8; 32] = blob.try_into().map_err(|_| {
        LedgerError::Serialization(format!(
            "identifier column holds {} bytes, expected 32",
            blob.len()
        ))
    })?;
    Ok(LedgerId::new(bytes))
}

fn id_column(row: &SqliteRow, column: &str) -> Result<LedgerId, LedgerError> {
    let blob: Vec<u8> = row.try_get(column)?;
    id_from_blob(&blob)
}

pub(crate) fn asset_from_row(row: &SqliteRow) -> Result<TokenizedAsset, LedgerError> {
    Ok(TokenizedAsset {
        asset_id: id_column(row, "asset_id")?,
        name: row.try_get("name")?,
        total_supply: row.try_get::<i64, _>("total_supply")? as u64,
        available_supply: row.try_get::<i64, _>("available_supply")? as u64,
        unit_price: decimal_from_text(&row.try_get::<String, _>("unit_price")?)?,
        min_investment_units: row.try_get::<i64, _>("min_investment_units")? as u64,
        status: AssetStatus::from_int(row.try_get::<i64, _>("status")?)?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn investment_from_row(row: &SqliteRow) -> Result<Investment, LedgerError> {
    Ok(Investment {
        investment_id: id_column(row, "investment_id")?,
        holder_id: id_column(row, "holder_id")?,
        asset_id: id_column(row, "asset_id")?,
        units_held: row.try_get::<i64, _>("units_held")? as u64,
        amount_paid: decimal_from_text(&row.try_get::<String, _>("amount_paid")?)?,
        status: InvestmentStatus::from_int(row.try_get::<i64, _>("status")?)?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn order_from_row(row: &SqliteRow) -> Result<Order, LedgerError> {
    Ok(Order {
        order_id: id_column(row, "order_id")?,
        holder_id: id_column(row, "holder_id")?,
        asset_id: id_column(row, "asset_id")?,
        side: OrderSide::from_int(row.try_get::<i64, _>("side")?)?,
        limit_price: decimal_from_text(&row.try_get::<String, _>("limit_price")?)?,
        units_requested: row.try_get::<i64, _>("units_requested")? as u64,
        units_filled: row.try_get::<i64, _>("units_filled")? as u64,
        status: OrderStatus::from_int(row.try_get::<i64, _>("status")?)?,
        unverified_holding: row.try_get::<i64, _>("unverified_holding")? != 0,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn dividend_from_row(row: &SqliteRow) -> Result<Dividend, LedgerError> {
    Ok(Dividend {
        dividend_id: id_column(row, "dividend_id")?,
        asset_id: id_column(row, "asset_id")?,
        total_amount: decimal_from_text(&row.try_get::<String, _>("total_amount")?)?,
        distribution_date: row.try_get("distribution_date")?,
        description: row.try_get("description")?,
        status: DividendStatus::from_int(row.try_get::<i64, _>("status")?)?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn payment_from_row(row: &SqliteRow) -> Result<DividendPayment, LedgerError> {
    Ok(DividendPayment {
        payment_id: id_column(row, "payment_id")?,
        dividend_id: id_column(row, "dividend_id")?,
        investment_id: id_column(row, "investment_id")?,
        holder_id: id_column(row, "holder_id")?,
        amount: decimal_from_text(&row.try_get::<String, _>("amount")?)?,
        paid_at: row.try_get("paid_at")?,
    })
}

pub(crate) fn compliance_record_from_row(row: &SqliteRow) -> Result<ComplianceRecord, LedgerError> {
    Ok(ComplianceRecord {
        holder_id: id_column(row, "holder_id")?,
        status: ComplianceStatus::from_int(row.try_get::<i64, _>("status")?)?,
        role: HolderRole::from_int(row.try_get::<i64, _>("role")?)?,
        updated_at: row.try_get("updated_at")?,
    })
}
