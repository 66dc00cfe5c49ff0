//! Core chain primitives shared by the wire protocol and the chain
//! capability: blocks, transactions and the decimal-string encoding used
//! for big-integer total difficulty.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::error::TxError;

/// Transaction type: a plain account-to-account transfer.
pub const TX_TYPE_BALANCE: i64 = 0x1;

/// Serialize a `U256` as a decimal string on the wire. Hex would be the
/// crate default; the protocol fixes decimal so that difficulty values
/// survive round-trips through text-based tooling unchanged.
pub mod td_decimal {
    use primitive_types::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(d)?;
        U256::from_dec_str(&raw).map_err(|e| de::Error::custom(format!("bad decimal: {e:?}")))
    }
}

/// An ordered list of block locator hashes.
///
/// Callers MUST supply locators newest-first: `on_get_block_hashes` scans
/// them in order and anchors sync on the first hash it recognizes, so a
/// stale-first ordering would re-anchor the requester on ancient history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locators(pub Vec<String>);

impl Locators {
    pub fn new(hashes: Vec<String>) -> Self {
        Self(hashes)
    }

    /// Locator list containing only the given tip hash.
    pub fn single(hash: String) -> Self {
        Self(vec![hash])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub parent_hash: String,
    pub number: u64,
    pub timestamp: u64,
    pub difficulty: u64,
    /// Cumulative work from genesis up to and including this block.
    #[serde(with = "td_decimal")]
    pub total_difficulty: U256,
    pub nonce: u64,
    pub tx_root: String,
    pub state_root: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Tx>,
    pub hash: String,
    /// Producer signature over the header hash (hex ed25519).
    pub signature: String,
}

impl Block {
    /// Hash of the serialized header, hex encoded.
    pub fn compute_hash(header: &BlockHeader) -> String {
        let bytes = bincode::serialize(header).unwrap_or_default();
        hex::encode(blake3::hash(&bytes).as_bytes())
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn total_difficulty(&self) -> U256 {
        self.header.total_difficulty
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    /// Transaction class; see `TX_TYPE_BALANCE`. Kept as a raw integer so
    /// unknown classes decode and can be rejected with a stable error.
    pub tx_type: i64,
    pub nonce: u64,
    pub to: String,
    /// Sender's ed25519 public key, hex encoded.
    pub sender_pub_key: String,
    /// Decimal string amount.
    pub value: String,
    /// Decimal string fee.
    pub fee: String,
    pub timestamp: i64,
    /// ed25519 signature over `signable_bytes`, hex encoded.
    pub sig: String,
}

impl Tx {
    /// The byte view the sender signs: every field except the signature.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let unsigned = (
            self.tx_type,
            self.nonce,
            &self.to,
            &self.sender_pub_key,
            &self.value,
            &self.fee,
            self.timestamp,
        );
        bincode::serialize(&unsigned).unwrap_or_default()
    }

    /// Stable transaction id: hex blake3 of the signable bytes.
    pub fn id(&self) -> String {
        hex::encode(blake3::hash(&self.signable_bytes()).as_bytes())
    }

    /// Verify the embedded ed25519 signature against the sender key.
    pub fn verify_signature(&self) -> Result<(), TxError> {
        use ed25519_dalek::{Signature, Verifier, VerifyingKey};

        let key_bytes: [u8; 32] = hex::decode(&self.sender_pub_key)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or(TxError::VerificationFailed)?;
        let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| TxError::VerificationFailed)?;

        let sig_bytes: [u8; 64] = hex::decode(&self.sig)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or(TxError::VerificationFailed)?;
        let sig = Signature::from_bytes(&sig_bytes);

        key.verify(&self.signable_bytes(), &sig)
            .map_err(|_| TxError::VerificationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn td_decimal_round_trip() {
        #[derive(Serialize, Deserialize)]
        struct Wrap(#[serde(with = "td_decimal")] U256);

        let v = Wrap(U256::from_dec_str("340282366920938463463374607431768211456").unwrap());
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"340282366920938463463374607431768211456\"");

        let back: Wrap = serde_json::from_str(&json).unwrap();
        assert_eq!(back.0, v.0);
    }

    #[test]
    fn tx_id_ignores_signature() {
        let mut tx = Tx {
            tx_type: TX_TYPE_BALANCE,
            nonce: 1,
            to: "ember1abc".into(),
            sender_pub_key: "00".repeat(32),
            value: "10".into(),
            fee: "1".into(),
            timestamp: 1_700_000_000,
            sig: String::new(),
        };
        let id = tx.id();
        tx.sig = "ff".repeat(64);
        assert_eq!(tx.id(), id);
    }
}
