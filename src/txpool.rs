//! Transaction pool capability and the business-rule validation applied
//! to inbound transactions before they enter the pool.

use std::collections::HashMap;

use parking_lot::Mutex;
use primitive_types::U256;

use crate::error::TxError;
use crate::types::{Tx, TX_TYPE_BALANCE};

pub trait TxPool: Send + Sync {
    /// Admit a transaction. Pool-level failures (capacity, duplicates)
    /// surface as sentinel errors.
    fn put(&self, tx: Tx) -> Result<(), TxError>;

    fn has(&self, id: &str) -> bool;
}

/// Validate a transaction against the gossip admission rules.
///
/// Checked in contract order: type, value, fee, signature. Each failure
/// maps to a distinct sentinel whose display string is stable.
pub fn validate_tx(tx: &Tx, min_fee: u64) -> Result<(), TxError> {
    if tx.tx_type != TX_TYPE_BALANCE {
        return Err(TxError::TypeUnknown);
    }

    let value = U256::from_dec_str(tx.value.trim()).map_err(|_| TxError::LowValue)?;
    if value.is_zero() {
        return Err(TxError::LowValue);
    }

    let fee = U256::from_dec_str(tx.fee.trim()).map_err(|_| TxError::InsufficientFee)?;
    if fee < U256::from(min_fee) {
        return Err(TxError::InsufficientFee);
    }

    tx.verify_signature()
}

/// Capacity-bounded map pool; the reference implementation used by the
/// integration suite.
pub struct InMemoryTxPool {
    capacity: usize,
    txs: Mutex<HashMap<String, Tx>>,
}

impl InMemoryTxPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            txs: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.txs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TxPool for InMemoryTxPool {
    fn put(&self, tx: Tx) -> Result<(), TxError> {
        let mut txs = self.txs.lock();
        let id = tx.id();
        if txs.contains_key(&id) {
            return Err(TxError::AlreadyInPool);
        }
        if txs.len() >= self.capacity {
            return Err(TxError::PoolFull);
        }
        txs.insert(id, tx);
        Ok(())
    }

    fn has(&self, id: &str) -> bool {
        self.txs.lock().contains_key(id)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::signed_tx;
    use super::*;

    #[test]
    fn zero_value_is_rejected() {
        let tx = signed_tx(1, TX_TYPE_BALANCE, "0", "10");
        assert_eq!(validate_tx(&tx, 1).unwrap_err(), TxError::LowValue);
        assert_eq!(
            validate_tx(&tx, 1).unwrap_err().to_string(),
            "value must be greater than zero"
        );
    }

    #[test]
    fn low_fee_is_rejected() {
        let tx = signed_tx(1, TX_TYPE_BALANCE, "5", "0");
        assert_eq!(validate_tx(&tx, 1).unwrap_err(), TxError::InsufficientFee);
        assert_eq!(
            validate_tx(&tx, 1).unwrap_err().to_string(),
            "insufficient fee"
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        let tx = signed_tx(1, 0x7f, "5", "10");
        assert_eq!(validate_tx(&tx, 1).unwrap_err(), TxError::TypeUnknown);
        assert_eq!(
            validate_tx(&tx, 1).unwrap_err().to_string(),
            "unknown transaction type"
        );
    }

    #[test]
    fn tampered_signature_fails_verification() {
        let mut tx = signed_tx(1, TX_TYPE_BALANCE, "5", "10");
        tx.value = "6".into();
        assert_eq!(
            validate_tx(&tx, 1).unwrap_err(),
            TxError::VerificationFailed
        );
        assert_eq!(
            validate_tx(&tx, 1).unwrap_err().to_string(),
            "signature verification failed"
        );
    }

    #[test]
    fn valid_tx_passes_and_enters_pool() {
        let tx = signed_tx(1, TX_TYPE_BALANCE, "5", "10");
        validate_tx(&tx, 1).unwrap();

        let pool = InMemoryTxPool::new(2);
        let id = tx.id();
        pool.put(tx.clone()).unwrap();
        assert!(pool.has(&id));
        assert_eq!(pool.put(tx).unwrap_err(), TxError::AlreadyInPool);
    }

    #[test]
    fn pool_capacity_is_enforced() {
        let pool = InMemoryTxPool::new(1);
        pool.put(signed_tx(1, TX_TYPE_BALANCE, "5", "10")).unwrap();
        let err = pool
            .put(signed_tx(2, TX_TYPE_BALANCE, "5", "10"))
            .unwrap_err();
        assert_eq!(err, TxError::PoolFull);
    }
}
