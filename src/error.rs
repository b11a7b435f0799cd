use thiserror::Error;

/// Why a single transaction input failed signature verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("input index {0} is out of range")]
    InputOutOfRange(usize),

    #[error("input references {expected} but was checked against {found}")]
    ReferenceMismatch { expected: String, found: String },

    #[error("referenced output index {index} does not exist in {hash}")]
    OutputOutOfRange { hash: String, index: u32 },

    #[error("invalid public key: {0}")]
    InvalidPublicKey(&'static str),

    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("invalid signature encoding: {0}")]
    MalformedSignature(&'static str),

    #[error("signature does not match the referenced output's address")]
    Invalid,
}

/// Recoverable rejection from `UtxoSet::can_spend`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpendError {
    #[error("transaction {0} is already applied")]
    AlreadyApplied(String),

    #[error("referenced UTXO {hash}:{index} does not exist or is spent")]
    MissingReference { hash: String, index: u32 },

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error("input total {inputs} exceeds output total {outputs}")]
    InputsExceedOutputs { inputs: u128, outputs: u128 },

    #[error("input total {0} equals output total")]
    InputsEqualOutputs(u128),
}

/// Rejection of a transaction set, either a block body or a standalone submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("number of transactions is invalid: {count} (allowed 1..={max})")]
    TransactionCount { count: usize, max: usize },

    #[error("transaction hash {stated} does not match expected {computed}")]
    HashMismatch { stated: String, computed: String },

    #[error("duplicate transaction {0}")]
    DuplicateTransaction(String),

    #[error("transaction {0} has neither inputs nor outputs")]
    EmptyTransaction(String),

    #[error("coinbase reward is too large: {amount} (cap {cap})")]
    CoinbaseTooLarge { amount: u64, cap: u64 },

    #[error("block holds only a coinbase transaction")]
    CoinbaseOnly,

    #[error("multiple coinbase transactions found")]
    MultipleCoinbase,

    #[error("coinbase {0} has more than one output")]
    CoinbaseOutputs(String),

    #[error("multiple inputs spend {hash}:{index}")]
    DoubleSpend { hash: String, index: u32 },

    #[error("output amount {amount} is below the minimum {min}")]
    OutputBelowMinimum { amount: u64, min: u64 },
}

/// Linkage or proof-of-work rejection of a candidate block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    #[error("invalid index: parent {parent}, next {found}")]
    Index { parent: u64, found: u64 },

    #[error("invalid previous hash: parent {parent}, next {found}")]
    PreviousHash { parent: String, found: String },

    #[error("invalid block hash: stated {stated}, expected {computed}")]
    Hash { stated: String, computed: String },

    #[error("block does not have a valid proof of work at difficulty {required}")]
    InsufficientWork { required: u32 },

    #[error(transparent)]
    Transactions(#[from] SyntaxError),
}

/// Structural failure while decoding a wire record.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("serialized {kind} hash is invalid: stated {stated}, computed {computed}")]
    HashMismatch {
        kind: &'static str,
        stated: String,
        computed: String,
    },
}

/// Internal-consistency violation. Seeing one of these means the block graph
/// or the UTXO set is corrupt, not that the caller sent something bad.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("input can not be spent: {hash} is unknown")]
    UnknownReference { hash: String },

    #[error("input can not be spent: {hash}:{index} is not unspent")]
    AlreadySpent { hash: String, index: u32 },

    #[error("transaction {0} is already registered")]
    AlreadyRegistered(String),

    #[error("reference {0} from reverted transaction does not exist")]
    MissingEntry(String),

    #[error("output {hash}:{index} is already unspent")]
    NotSpent { hash: String, index: u32 },

    #[error("transaction {0} still has spent outputs")]
    OutputsStillSpent(String),

    #[error("ancestor {0} is missing from the chain")]
    BrokenChain(String),

    #[error("block index {found} does not extend head index {head}")]
    HeadGap { head: u64, found: u64 },
}

/// Outcome of admitting a block into the chain.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("duplicate block {0}")]
    DuplicateBlock(String),

    #[error("previous block {0} is not in the chain")]
    NoParent(String),

    #[error("block could not be verified: {0}")]
    Invalid(#[from] BlockError),

    #[error("transaction {hash} can not be applied: {reason}")]
    Utxo {
        hash: String,
        #[source]
        reason: SpendError,
    },

    #[error(transparent)]
    Fault(#[from] Fault),
}

impl ChainError {
    /// True when the error points at corrupt chain state rather than a bad block.
    pub fn is_fault(&self) -> bool {
        matches!(self, ChainError::Fault(_))
    }
}

/// Rejection from the pending-transaction pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("transaction {0} is already pending")]
    Duplicate(String),

    #[error("pending pool is full ({0} transactions)")]
    Full(usize),
}
