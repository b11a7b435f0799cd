pub mod model;
pub mod utxo;

pub use model::{OutPoint, Transaction, TransactionRecord, TxInput, TxOutput, verify_transaction_input};
pub use utxo::{UtxoEntry, UtxoSet};
