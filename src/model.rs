use crate::error::LedgerError;
use crate::id::LedgerId;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Decimal places of the currency minor unit (cents)
pub const MINOR_UNIT_DP: u32 = 2;

/// Round a money amount to the currency minor unit, half-even, so that
/// repeated fan-out computations never drift in one direction.
pub fn round_to_minor_unit(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MINOR_UNIT_DP, RoundingStrategy::MidpointNearestEven)
}

/// Lifecycle of a tokenized asset. Assets are never deleted, only moved
/// through soft status transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetStatus {
    /// Open for new investments and orders
    Active,
    /// Temporarily not accepting new investments
    Paused,
    /// Offering wound down
    Closed,
}

impl AssetStatus {
    pub(crate) fn as_int(&self) -> i64 {
        match self {
            AssetStatus::Active => 0,
            AssetStatus::Paused => 1,
            AssetStatus::Closed => 2,
        }
    }

    pub(crate) fn from_int(value: i64) -> Result<Self, LedgerError> {
        match value {
            0 => Ok(AssetStatus::Active),
            1 => Ok(AssetStatus::Paused),
            2 => Ok(AssetStatus::Closed),
            _ => Err(LedgerError::Serialization(format!(
                "invalid asset status value: {}",
                value
            ))),
        }
    }
}

/// The fractional-ownership offering of one property.
///
/// `total_supply` is fixed at tokenization time; `available_supply` only
/// moves through the supply ledger and satisfies
/// `0 <= available_supply <= total_supply` at all times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedAsset {
    pub asset_id: LedgerId,
    pub name: String,
    pub total_supply: u64,
    pub available_supply: u64,
    /// Price of one unit, in currency
    pub unit_price: Decimal,
    /// Minimum number of units a single investment must cover
    pub min_investment_units: u64,
    pub status: AssetStatus,
    /// Unix timestamp (seconds)
    pub created_at: i64,
}

/// Input for tokenizing a property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAsset {
    pub name: String,
    pub total_supply: u64,
    pub unit_price: Decimal,
    pub min_investment_units: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvestmentStatus {
    /// Recorded and backed by reserved supply, awaiting settlement
    Pending,
    /// Settled; participates in dividend fan-out
    Active,
    /// Reversed; its units were returned to available supply
    Cancelled,
}

impl InvestmentStatus {
    pub(crate) fn as_int(&self) -> i64 {
        match self {
            InvestmentStatus::Pending => 0,
            InvestmentStatus::Active => 1,
            InvestmentStatus::Cancelled => 2,
        }
    }

    pub(crate) fn from_int(value: i64) -> Result<Self, LedgerError> {
        match value {
            0 => Ok(InvestmentStatus::Pending),
            1 => Ok(InvestmentStatus::Active),
            2 => Ok(InvestmentStatus::Cancelled),
            _ => Err(LedgerError::Serialization(format!(
                "invalid investment status value: {}",
                value
            ))),
        }
    }
}

/// A holder's claim of `units_held` units of a tokenized asset.
/// Units and amount are immutable after creation; cancellation reverses the
/// claim instead of editing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Investment {
    pub investment_id: LedgerId,
    pub holder_id: LedgerId,
    pub asset_id: LedgerId,
    pub units_held: u64,
    pub amount_paid: Decimal,
    pub status: InvestmentStatus,
    /// Unix timestamp (seconds)
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub(crate) fn as_int(&self) -> i64 {
        match self {
            OrderSide::Buy => 0,
            OrderSide::Sell => 1,
        }
    }

    pub(crate) fn from_int(value: i64) -> Result<Self, LedgerError> {
        match value {
            0 => Ok(OrderSide::Buy),
            1 => Ok(OrderSide::Sell),
            _ => Err(LedgerError::Serialization(format!(
                "invalid order side value: {}",
                value
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub(crate) fn as_int(&self) -> i64 {
        match self {
            OrderStatus::Open => 0,
            OrderStatus::Filled => 1,
            OrderStatus::Cancelled => 2,
            OrderStatus::Expired => 3,
        }
    }

    pub(crate) fn from_int(value: i64) -> Result<Self, LedgerError> {
        match value {
            0 => Ok(OrderStatus::Open),
            1 => Ok(OrderStatus::Filled),
            2 => Ok(OrderStatus::Cancelled),
            3 => Ok(OrderStatus::Expired),
            _ => Err(LedgerError::Serialization(format!(
                "invalid order status value: {}",
                value
            ))),
        }
    }
}

/// A recorded buy/sell intent. The ledger stores intents only; fills are the
/// business of an external matching process, which is the sole writer of
/// `units_filled` and the `Filled`/`Expired` transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: LedgerId,
    pub holder_id: LedgerId,
    pub asset_id: LedgerId,
    pub side: OrderSide,
    pub limit_price: Decimal,
    pub units_requested: u64,
    pub units_filled: u64,
    pub status: OrderStatus,
    /// Set on sell intents whose mirrored holdings do not cover the request.
    /// The mirror cannot disprove holdings acquired on-chain, so such orders
    /// are accepted but flagged for review rather than rejected.
    pub unverified_holding: bool,
    /// Unix timestamp (seconds)
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DividendStatus {
    Scheduled,
    Distributed,
}

impl DividendStatus {
    pub(crate) fn as_int(&self) -> i64 {
        match self {
            DividendStatus::Scheduled => 0,
            DividendStatus::Distributed => 1,
        }
    }

    pub(crate) fn from_int(value: i64) -> Result<Self, LedgerError> {
        match value {
            0 => Ok(DividendStatus::Scheduled),
            1 => Ok(DividendStatus::Distributed),
            _ => Err(LedgerError::Serialization(format!(
                "invalid dividend status value: {}",
                value
            ))),
        }
    }
}

/// A scheduled per-asset payout event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dividend {
    pub dividend_id: LedgerId,
    pub asset_id: LedgerId,
    pub total_amount: Decimal,
    /// Unix timestamp (seconds) of the scheduled distribution
    pub distribution_date: i64,
    pub description: String,
    pub status: DividendStatus,
    /// Unix timestamp (seconds)
    pub created_at: i64,
}

/// Input for scheduling a dividend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDividend {
    pub asset_id: LedgerId,
    pub total_amount: Decimal,
    /// Unix timestamp (seconds)
    pub distribution_date: i64,
    pub description: String,
}

/// One holder's share of one dividend. Immutable after creation; exactly one
/// exists per (dividend, investment) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DividendPayment {
    pub payment_id: LedgerId,
    pub dividend_id: LedgerId,
    pub investment_id: LedgerId,
    pub holder_id: LedgerId,
    pub amount: Decimal,
    /// Unix timestamp (seconds)
    pub paid_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplianceStatus {
    NotSubmitted,
    Pending,
    Verified,
    Rejected,
}

impl ComplianceStatus {
    pub(crate) fn as_int(&self) -> i64 {
        match self {
            ComplianceStatus::NotSubmitted => 0,
            ComplianceStatus::Pending => 1,
            ComplianceStatus::Verified => 2,
            ComplianceStatus::Rejected => 3,
        }
    }

    pub(crate) fn from_int(value: i64) -> Result<Self, LedgerError> {
        match value {
            0 => Ok(ComplianceStatus::NotSubmitted),
            1 => Ok(ComplianceStatus::Pending),
            2 => Ok(ComplianceStatus::Verified),
            3 => Ok(ComplianceStatus::Rejected),
            _ => Err(LedgerError::Serialization(format!(
                "invalid compliance status value: {}",
                value
            ))),
        }
    }
}

/// Explicit, server-side role attribute on the holder record. Admin-gated
/// operations check this and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HolderRole {
    Investor,
    Admin,
}

impl HolderRole {
    pub(crate) fn as_int(&self) -> i64 {
        match self {
            HolderRole::Investor => 0,
            HolderRole::Admin => 1,
        }
    }

    pub(crate) fn from_int(value: i64) -> Result<Self, LedgerError> {
        match value {
            0 => Ok(HolderRole::Investor),
            1 => Ok(HolderRole::Admin),
            _ => Err(LedgerError::Serialization(format!(
                "invalid holder role value: {}",
                value
            ))),
        }
    }
}

/// A holder's KYC state; at most one record exists per holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceRecord {
    pub holder_id: LedgerId,
    pub status: ComplianceStatus,
    pub role: HolderRole,
    /// Unix timestamp (seconds)
    pub updated_at: i64,
}

/// Canonical text form of a money amount for TEXT column storage
pub(crate) fn decimal_to_text(amount: &Decimal) -> String {
    amount.normalize().to_string()
}

pub(crate) fn decimal_from_text(text: &str) -> Result<Decimal, LedgerError> {
    text.parse::<Decimal>()
        .map_err(|e| LedgerError::Serialization(format!("invalid money amount {:?}: {}", text, e)))
}
