use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use crate::error::LedgerError;

// LedgerId uniquely identifies an entity in the ledger: assets, holders,
// investments, orders, dividends and dividend payments all share the same
// 32-byte identifier space.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LedgerId([u8; 32]);

impl Default for LedgerId {
    fn default() -> Self {
        LedgerId([0; 32])
    }
}

impl Deref for LedgerId {
    type Target = [u8; 32];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl LedgerId {
    pub fn new(id: [u8; 32]) -> Self {
        LedgerId(id)
    }

    /// Derive an identifier from a list of seeds under a domain separator.
    /// The same seeds always produce the same identifier.
    pub fn derive(seeds: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();

        // Domain separator
        hasher.update(b"ASSET_LEDGER_ID");

        for seed in seeds {
            hasher.update(seed);
        }

        LedgerId(hasher.finalize().into())
    }

    /// Deterministic identifier for the payment of one dividend to one
    /// investment. Re-running a distribution derives the same id, which is
    /// what makes the (dividend, investment) pair an idempotency key.
    pub fn for_payment(dividend_id: &LedgerId, investment_id: &LedgerId) -> Self {
        LedgerId::derive(&[b"dividend_payment", &**dividend_id, &**investment_id])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for LedgerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for LedgerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LedgerId({})", hex::encode(self.0))
    }
}

impl FromStr for LedgerId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|e| LedgerError::Validation(format!("invalid identifier hex: {}", e)))?;
        let array: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            LedgerError::Validation(format!("identifier must be 32 bytes, got {}", v.len()))
        })?;
        Ok(LedgerId(array))
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Generate a unique LedgerId for testing purposes
    pub fn unique_id() -> LedgerId {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_nanos()
            .to_le_bytes();

        let count = {
            use std::sync::atomic::{AtomicU64, Ordering};
            static COUNTER: AtomicU64 = AtomicU64::new(0);
            COUNTER.fetch_add(1, Ordering::Relaxed)
        };

        LedgerId::derive(&[timestamp.as_slice(), &count.to_le_bytes()])
    }

    #[test]
    fn test_unique_id() {
        let id1 = unique_id();
        let id2 = unique_id();

        assert_ne!(id1, id2);
        assert_ne!(id1, LedgerId::default());
        assert_ne!(id2, LedgerId::default());
    }

    #[test]
    fn test_derive_is_deterministic() {
        let id1 = LedgerId::derive(&[b"asset", b"riverside-lofts"]);
        let id2 = LedgerId::derive(&[b"asset", b"riverside-lofts"]);
        assert_eq!(id1, id2);

        // Different seed order produces a different identifier
        let id3 = LedgerId::derive(&[b"riverside-lofts", b"asset"]);
        assert_ne!(id1, id3);
    }

    #[test]
    fn test_payment_id_keyed_by_pair() {
        let dividend = unique_id();
        let investment = unique_id();

        let payment = LedgerId::for_payment(&dividend, &investment);
        assert_eq!(payment, LedgerId::for_payment(&dividend, &investment));

        let other_investment = unique_id();
        assert_ne!(payment, LedgerId::for_payment(&dividend, &other_investment));
    }

    #[test]
    fn test_hex_round_trip() {
        let id = unique_id();
        let text = id.to_string();
        assert_eq!(text.len(), 64);

        let parsed: LedgerId = text.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_from_str_rejects_bad_input() {
        assert!("not-hex".parse::<LedgerId>().is_err());
        assert!("abcd".parse::<LedgerId>().is_err());
    }
}
