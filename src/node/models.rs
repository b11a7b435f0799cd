use serde::Serialize;

/// Answer to a block or transaction submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SubmitOutcome {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl ToString) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Snapshot of the node for status output.
#[derive(Debug, Clone, Serialize)]
pub struct ChainStats {
    pub height: u64,
    pub head_hash: String,
    pub next_difficulty: u32,
    pub target_block_time_secs: f64,
    pub retarget_interval: u64,
    pub last_interval_secs: Option<f64>,
    pub stored_blocks: usize,
    pub pending_size: usize,
    pub utxo_size: usize,
}
