//! Back-office ledger for tokenized property assets.
//!
//! Tracks how many fractional units of each tokenized property exist, who
//! holds them through investments, what buy/sell intents are outstanding and
//! how dividends fan out to holders. The ledger is a mirror of potential
//! on-chain state, not the chain itself; the compliance gate is consumed as a
//! plain "may this holder transact" predicate.

pub mod error;
pub mod id;
pub mod ledger_traits;
pub mod model;
pub mod sqlite;

// Re-export the main types for convenience
pub use error::LedgerError;
pub use id::LedgerId;
pub use ledger_traits::{
    AssetCatalog, ComplianceGate, DistributionReport, DividendDistributor, InvestmentRecorder,
    OrderBook, OrderFilter, Reservation, SupplyReconciliation, TokenSupplyLedger,
};
pub use model::{
    AssetStatus, ComplianceRecord, ComplianceStatus, Dividend, DividendPayment, DividendStatus,
    HolderRole, Investment, InvestmentStatus, NewAsset, NewDividend, Order, OrderSide, OrderStatus,
    TokenizedAsset,
};
pub use sqlite::SqliteLedger;
