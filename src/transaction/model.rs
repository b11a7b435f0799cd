use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{DecodeError, SignatureError};
use crate::wallet;

/// Identifies a specific transaction output by transaction hash and index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: String,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInput {
    /// Hash of the transaction whose output is spent.
    pub referenced_hash: String,
    pub referenced_output_index: u32,
    /// Hex-encoded DER ECDSA signature over the transaction's signable content.
    pub signature: String,
}

impl TxInput {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            hash: self.referenced_hash.clone(),
            index: self.referenced_output_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    pub amount: u64,
}

/// An immutable value transfer. The hash is computed once at construction
/// and re-checked whenever a transaction is decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TransactionRecord")]
pub struct Transaction {
    inputs: Vec<TxInput>,
    outputs: Vec<TxOutput>,
    timestamp: f64,
    hash: String,
}

/// Wire shape of a transaction before its hash has been checked.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionRecord {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub timestamp: f64,
    pub hash: String,
}

impl Transaction {
    /// Build a transaction spending `spends` (each signed with its key) into `outputs`.
    /// With nothing to spend and a single output this is a coinbase.
    pub fn create(outputs: Vec<TxOutput>, timestamp: f64, spends: &[(OutPoint, &SecretKey)]) -> Self {
        let mut inputs: Vec<TxInput> = spends
            .iter()
            .map(|(op, _)| TxInput {
                referenced_hash: op.hash.clone(),
                referenced_output_index: op.index,
                signature: String::new(),
            })
            .collect();

        let sighash = sighash_of(&inputs, &outputs, timestamp);
        for (input, (_, sk)) in inputs.iter_mut().zip(spends) {
            input.signature = wallet::sign(sighash, sk);
        }

        let hash = Self::compute_hash(&inputs, &outputs, timestamp);
        Self {
            inputs,
            outputs,
            timestamp,
            hash,
        }
    }

    /// Block reward paying `amount` to `address`.
    pub fn coinbase(address: impl Into<String>, amount: u64, timestamp: f64) -> Self {
        Self::create(
            vec![TxOutput {
                address: address.into(),
                amount,
            }],
            timestamp,
            &[],
        )
    }

    /// SHA-256 over the canonical JSON of inputs (signatures included),
    /// outputs and timestamp.
    pub fn compute_hash(inputs: &[TxInput], outputs: &[TxOutput], timestamp: f64) -> String {
        let payload = serde_json::json!({
            "inputs": inputs,
            "outputs": outputs,
            "timestamp": timestamp,
        });
        hex::encode(Sha256::digest(payload.to_string().as_bytes()))
    }

    pub fn inputs(&self) -> &[TxInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TxOutput] {
        &self.outputs
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty() && self.outputs.len() == 1
    }

    pub fn total_output_amount(&self) -> u128 {
        self.outputs.iter().map(|o| o.amount as u128).sum()
    }

    /// Hash recomputed from the current fields.
    pub fn recomputed_hash(&self) -> String {
        Self::compute_hash(&self.inputs, &self.outputs, self.timestamp)
    }

    /// Message every input signs: the content with signatures left out.
    pub fn sighash(&self) -> [u8; 32] {
        sighash_of(&self.inputs, &self.outputs, self.timestamp)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode and verify the stated hash against the content.
    pub fn from_json(json: &str) -> Result<Self, DecodeError> {
        let record: TransactionRecord = serde_json::from_str(json)?;
        Self::try_from(record)
    }

    #[cfg(test)]
    pub(crate) fn with_stated_hash(mut self, hash: &str) -> Self {
        self.hash = hash.to_string();
        self
    }
}

impl TryFrom<TransactionRecord> for Transaction {
    type Error = DecodeError;

    fn try_from(record: TransactionRecord) -> Result<Self, Self::Error> {
        let computed = Self::compute_hash(&record.inputs, &record.outputs, record.timestamp);
        if computed != record.hash {
            return Err(DecodeError::HashMismatch {
                kind: "transaction",
                stated: record.hash,
                computed,
            });
        }
        Ok(Self {
            inputs: record.inputs,
            outputs: record.outputs,
            timestamp: record.timestamp,
            hash: computed,
        })
    }
}

fn sighash_of(inputs: &[TxInput], outputs: &[TxOutput], timestamp: f64) -> [u8; 32] {
    let lite_inputs: Vec<_> = inputs
        .iter()
        .map(|i| {
            serde_json::json!({
                "referencedHash": i.referenced_hash,
                "referencedOutputIndex": i.referenced_output_index,
            })
        })
        .collect();
    let payload = serde_json::json!({
        "inputs": lite_inputs,
        "outputs": outputs,
        "timestamp": timestamp,
    });
    Sha256::digest(payload.to_string().as_bytes()).into()
}

/// Check the signature of `transaction.inputs()[input_index]` against the
/// address of the output it spends in `referenced`.
pub fn verify_transaction_input(
    referenced: &Transaction,
    transaction: &Transaction,
    input_index: usize,
) -> Result<(), SignatureError> {
    let input = transaction
        .inputs
        .get(input_index)
        .ok_or(SignatureError::InputOutOfRange(input_index))?;

    if input.referenced_hash != referenced.hash {
        return Err(SignatureError::ReferenceMismatch {
            expected: input.referenced_hash.clone(),
            found: referenced.hash.clone(),
        });
    }

    let output = referenced
        .outputs
        .get(input.referenced_output_index as usize)
        .ok_or_else(|| SignatureError::OutputOutOfRange {
            hash: referenced.hash.clone(),
            index: input.referenced_output_index,
        })?;

    if wallet::verify_signature_hex(&output.address, &input.signature, transaction.sighash())? {
        Ok(())
    } else {
        Err(SignatureError::Invalid)
    }
}
