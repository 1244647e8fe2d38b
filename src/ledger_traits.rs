use crate::error::LedgerError;
use crate::id::LedgerId;
use crate::model::{
    AssetStatus, ComplianceRecord, Dividend, DividendPayment, Investment, NewAsset, NewDividend,
    Order, OrderSide, OrderStatus, TokenizedAsset,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Proof that available supply was decremented to back a pending investment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub asset_id: LedgerId,
    pub units: u64,
    /// Available supply immediately after the reservation committed
    pub remaining_supply: u64,
}

/// Result of the supply audit: `total - available` must equal the units held
/// by all non-cancelled investments of the asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyReconciliation {
    pub asset_id: LedgerId,
    pub total_supply: u64,
    pub available_supply: u64,
    /// Sum of `units_held` over non-cancelled investments
    pub units_outstanding: u64,
    pub consistent: bool,
}

/// Filter criteria for listing orders. Built once and passed by reference;
/// the query is derived from it, never from a mutated builder object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderFilter {
    pub asset_id: Option<LedgerId>,
    pub side: Option<OrderSide>,
    pub status: Option<OrderStatus>,
}

impl OrderFilter {
    /// The common query: open orders of one asset
    pub fn open_for_asset(asset_id: LedgerId) -> Self {
        OrderFilter {
            asset_id: Some(asset_id),
            side: None,
            status: Some(OrderStatus::Open),
        }
    }
}

/// Outcome of one dividend fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionReport {
    pub dividend_id: LedgerId,
    pub payments_created: usize,
    pub total_paid: Decimal,
    /// Rounding remainder retained by the dividend pool, never paid out
    pub remainder: Decimal,
}

/// Registry of tokenized properties
pub trait AssetCatalog {
    /// Tokenize a property, fixing its total supply. All supply starts
    /// available.
    fn tokenize_asset(&self, new_asset: NewAsset) -> Result<TokenizedAsset, LedgerError>;

    fn get_asset(&self, asset_id: &LedgerId) -> Result<Option<TokenizedAsset>, LedgerError>;

    /// Soft status transition; assets are never deleted
    fn set_asset_status(&self, asset_id: &LedgerId, status: AssetStatus) -> Result<(), LedgerError>;

    fn list_assets(&self) -> Result<Vec<TokenizedAsset>, LedgerError>;
}

/// The verified/not-verified KYC predicate gating ledger-mutating actions
pub trait ComplianceGate {
    /// Returns true iff the holder's compliance record exists and is
    /// `Verified`. A missing record means not eligible (fail closed); absence
    /// is never an error.
    fn is_eligible(&self, holder_id: &LedgerId, asset_id: &LedgerId) -> Result<bool, LedgerError>;

    fn upsert_compliance_record(&self, record: &ComplianceRecord) -> Result<(), LedgerError>;

    fn get_compliance_record(
        &self,
        holder_id: &LedgerId,
    ) -> Result<Option<ComplianceRecord>, LedgerError>;
}

/// The only writer of asset supply counters
pub trait TokenSupplyLedger {
    /// Atomically check-and-decrement available supply. Two concurrent
    /// reservations on the same asset can never both succeed if their
    /// combined units exceed what is available.
    ///
    /// # Returns
    /// A `Reservation` on success; `InsufficientSupply` with no mutation if
    /// fewer than `units` are available.
    fn reserve(&self, asset_id: &LedgerId, units: u64) -> Result<Reservation, LedgerError>;

    /// Return units to available supply (used on cancellation). Clamped at
    /// `total_supply`; a clamp is logged as an invariant violation.
    fn release(&self, asset_id: &LedgerId, units: u64) -> Result<(), LedgerError>;

    /// Audit the reconciliation invariant for one asset
    fn reconcile(&self, asset_id: &LedgerId) -> Result<SupplyReconciliation, LedgerError>;
}

/// Creates investment records, consuming available supply
pub trait InvestmentRecorder {
    /// Record an investment of `units_requested` units.
    ///
    /// Validation order: asset must exist and be active (`NotFound`), the
    /// holder must pass the compliance gate (`Ineligible`), and `amount_paid`
    /// must cover the asset's minimum investment (`Validation`). Only then is
    /// supply reserved and the investment row written, both in one database
    /// transaction: a reservation without its investment row can never be
    /// observed.
    fn create_investment(
        &self,
        holder_id: &LedgerId,
        asset_id: &LedgerId,
        amount_paid: Decimal,
        units_requested: u64,
    ) -> Result<Investment, LedgerError>;

    /// Settle a pending investment (admin only). Active investments
    /// participate in dividend fan-out.
    fn activate_investment(
        &self,
        admin_id: &LedgerId,
        investment_id: &LedgerId,
    ) -> Result<Investment, LedgerError>;

    /// Reverse an investment, returning its units to available supply in the
    /// same transaction that flips the status.
    fn cancel_investment(&self, investment_id: &LedgerId) -> Result<Investment, LedgerError>;

    fn get_investment(&self, investment_id: &LedgerId)
        -> Result<Option<Investment>, LedgerError>;

    fn list_investments_for_holder(
        &self,
        holder_id: &LedgerId,
    ) -> Result<Vec<Investment>, LedgerError>;
}

/// Records buy/sell intents. No matching engine: orders stay `Open` until an
/// external process fills, expires or cancels them.
pub trait OrderBook {
    /// Record an intent. Sell intents whose mirrored active holdings do not
    /// cover the request are accepted with `unverified_holding` set.
    fn place_order(
        &self,
        holder_id: &LedgerId,
        asset_id: &LedgerId,
        side: OrderSide,
        limit_price: Decimal,
        units_requested: u64,
    ) -> Result<Order, LedgerError>;

    /// List orders matching the filter, ordered by creation time ascending
    /// with ties broken by order id.
    fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, LedgerError>;

    /// Withdraw an open intent. Only the holder who placed it may cancel.
    fn cancel_order(&self, holder_id: &LedgerId, order_id: &LedgerId)
        -> Result<Order, LedgerError>;
}

/// Computes and persists per-holder shares of scheduled dividends
pub trait DividendDistributor {
    /// Schedule a payout event for an asset (admin only)
    fn schedule_dividend(
        &self,
        admin_id: &LedgerId,
        new_dividend: NewDividend,
    ) -> Result<Dividend, LedgerError>;

    /// Fan the dividend out to all active investments of its asset, one
    /// payment per investment, proportional to units held, rounded half-even
    /// to the minor unit. The whole batch commits atomically and the dividend
    /// is marked distributed with it; re-invoking for an already-distributed
    /// dividend returns `AlreadyDistributed` and writes nothing.
    fn distribute(&self, dividend_id: &LedgerId) -> Result<DistributionReport, LedgerError>;

    fn get_dividend(&self, dividend_id: &LedgerId) -> Result<Option<Dividend>, LedgerError>;

    fn list_payments_for_dividend(
        &self,
        dividend_id: &LedgerId,
    ) -> Result<Vec<DividendPayment>, LedgerError>;

    /// A holder's payment history, newest first, paginated
    fn list_payments_for_holder(
        &self,
        holder_id: &LedgerId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DividendPayment>, LedgerError>;
}
