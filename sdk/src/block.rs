//! # Block Structure
//!
//! A block is what the node hands the application every time consensus
//! commits something. The SDK never inspects signatures or verifies hashes;
//! it only decodes the envelope and the base64 transaction payloads.
//!
//! ## Wire Layout
//!
//! ```text
//! {
//!   "Body": {
//!     "Index":         i64,
//!     "RoundReceived": i64,
//!     "StateHash":     base64 string or null,
//!     "Transactions":  [base64 string, ...] or null
//!   },
//!   "Signatures": <anything, passed through untouched>
//! }
//! ```
//!
//! ## Decoding Rules
//!
//! Decoding is all-or-nothing. A missing field or a single bad base64
//! transaction rejects the whole block; a partially-built block never
//! reaches the queue.
//!
//! A null `StateHash` or `Transactions` reads as empty through the accessors
//! but is written back as null by [`Block::to_value`].

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a block payload is rejected.
#[derive(Debug, Error)]
pub enum BlockDecodeError {
    /// A required key is absent. Carries the dotted path, e.g. `Body.Index`.
    #[error("missing field {0}")]
    MissingField(&'static str),

    /// A key is present but holds the wrong JSON type.
    #[error("field {field} must be {expected}")]
    InvalidField {
        /// Dotted path of the field.
        field: &'static str,
        /// What we wanted to find there.
        expected: &'static str,
    },

    /// A transaction entry is not a string.
    #[error("transaction {index} must be a base64 string")]
    InvalidTransaction {
        /// Position in `Body.Transactions`.
        index: usize,
    },

    /// A byte field did not decode as standard base64.
    #[error("invalid base64 in {field}: {source}")]
    InvalidBase64 {
        /// Dotted path of the field, with an index for transactions.
        field: String,
        /// Underlying decoder error.
        #[source]
        source: base64::DecodeError,
    },
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A committed block, decoded.
///
/// Immutable after construction. `transactions()[i]` is always the base64
/// decoding of `raw_transactions()[i]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    index: i64,
    round_received: i64,
    // `None` when the wire field was null.
    state_hash: Option<Vec<u8>>,
    raw_transactions: Option<Vec<String>>,
    transactions: Vec<Vec<u8>>,
    signatures: Value,
}

impl Block {
    /// Builds a block from its parts, decoding every raw transaction.
    pub fn new(
        index: i64,
        round_received: i64,
        state_hash: Vec<u8>,
        raw_transactions: Vec<String>,
        signatures: Value,
    ) -> Result<Self, BlockDecodeError> {
        Self::from_parts(
            index,
            round_received,
            Some(state_hash),
            Some(raw_transactions),
            signatures,
        )
    }

    fn from_parts(
        index: i64,
        round_received: i64,
        state_hash: Option<Vec<u8>>,
        raw_transactions: Option<Vec<String>>,
        signatures: Value,
    ) -> Result<Self, BlockDecodeError> {
        let transactions = raw_transactions
            .iter()
            .flatten()
            .enumerate()
            .map(|(i, raw)| {
                BASE64
                    .decode(raw)
                    .map_err(|source| BlockDecodeError::InvalidBase64 {
                        field: format!("Body.Transactions[{}]", i),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            index,
            round_received,
            state_hash,
            raw_transactions,
            transactions,
            signatures,
        })
    }

    /// Decodes an inbound `CommitBlock` payload.
    pub fn from_value(value: &Value) -> Result<Self, BlockDecodeError> {
        let body = value
            .get("Body")
            .ok_or(BlockDecodeError::MissingField("Body"))?;

        let index = required_i64(body, "Index", "Body.Index")?;
        let round_received = required_i64(body, "RoundReceived", "Body.RoundReceived")?;

        let state_hash = match body.get("StateHash") {
            None => return Err(BlockDecodeError::MissingField("Body.StateHash")),
            Some(Value::Null) => None,
            Some(Value::String(encoded)) => Some(BASE64.decode(encoded).map_err(|source| {
                BlockDecodeError::InvalidBase64 {
                    field: "Body.StateHash".to_string(),
                    source,
                }
            })?),
            Some(_) => {
                return Err(BlockDecodeError::InvalidField {
                    field: "Body.StateHash",
                    expected: "a base64 string",
                })
            }
        };

        let raw_transactions = match body.get("Transactions") {
            None => return Err(BlockDecodeError::MissingField("Body.Transactions")),
            Some(Value::Null) => None,
            Some(Value::Array(entries)) => Some(
                entries
                    .iter()
                    .enumerate()
                    .map(|(index, entry)| {
                        entry
                            .as_str()
                            .map(str::to_owned)
                            .ok_or(BlockDecodeError::InvalidTransaction { index })
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Some(_) => {
                return Err(BlockDecodeError::InvalidField {
                    field: "Body.Transactions",
                    expected: "an array",
                })
            }
        };

        let signatures = value
            .get("Signatures")
            .cloned()
            .ok_or(BlockDecodeError::MissingField("Signatures"))?;

        Self::from_parts(index, round_received, state_hash, raw_transactions, signatures)
    }

    /// Re-serializes to the wire layout the block arrived in.
    pub fn to_value(&self) -> Value {
        let state_hash = self
            .state_hash
            .as_ref()
            .map_or(Value::Null, |hash| Value::String(BASE64.encode(hash)));
        json!({
            "Body": {
                "Index": self.index,
                "RoundReceived": self.round_received,
                "StateHash": state_hash,
                "Transactions": self.raw_transactions,
            },
            "Signatures": self.signatures,
        })
    }

    /// Position of this block in the chain.
    pub fn index(&self) -> i64 {
        self.index
    }

    /// Consensus round in which the block's events were received.
    pub fn round_received(&self) -> i64 {
        self.round_received
    }

    /// Application state hash the node recorded for this block.
    pub fn state_hash(&self) -> &[u8] {
        self.state_hash.as_deref().unwrap_or_default()
    }

    /// Transactions exactly as they arrived (base64 text).
    pub fn raw_transactions(&self) -> &[String] {
        self.raw_transactions.as_deref().unwrap_or_default()
    }

    /// Decoded transaction payloads, in block order.
    pub fn transactions(&self) -> &[Vec<u8>] {
        &self.transactions
    }

    /// Validator signatures, untouched.
    pub fn signatures(&self) -> &Value {
        &self.signatures
    }

    /// Consumes the block, yielding its decoded transactions.
    pub fn into_transactions(self) -> Vec<Vec<u8>> {
        self.transactions
    }
}

impl Serialize for Block {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Block {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Block::from_value(&value).map_err(de::Error::custom)
    }
}

impl TryFrom<Value> for Block {
    type Error = BlockDecodeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Block::from_value(&value)
    }
}

fn required_i64(
    body: &Value,
    key: &str,
    path: &'static str,
) -> Result<i64, BlockDecodeError> {
    body.get(key)
        .ok_or(BlockDecodeError::MissingField(path))?
        .as_i64()
        .ok_or(BlockDecodeError::InvalidField {
            field: path,
            expected: "an integer",
        })
}
