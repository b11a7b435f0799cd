pub mod block;
pub mod model;
pub mod pow;
pub mod validation;

pub use block::Block;
pub use model::Chain;

use chrono::Utc;

/// Lowest difficulty (leading hex zeros) any block is held to.
pub const MIN_MINING_DIFFICULTY: u32 = 1;

/// Difficulty is recomputed on blocks whose index is a multiple of this.
pub const RETARGET_INTERVAL: u64 = 10;

/// Target seconds per block for the retarget.
pub const TARGET_BLOCK_TIME_SECS: f64 = 60.0;

/// Weight applied to the previous difficulty and to the timing ratio.
pub const MAX_DIFFICULTY_DELTA: u32 = 1;

/// Inter-block gaps at or above this many seconds are left out of the average.
pub const OUTLIER_CUTOFF_SECS: f64 = 600.0;

/// Total coins the subsidy schedule is sized for.
pub const MAX_SUPPLY: u64 = 21_000_000;

/// Block subsidy while the supply lasts.
pub const COINBASE_REWARD: u64 = 250;

/// Reward cap once `MAX_SUPPLY / COINBASE_REWARD` blocks are behind us.
pub const COINBASE_REWARD_AFTER: u64 = 25;

pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 100;

pub const MIN_TRANSACTION_AMOUNT: u64 = 1;

/* ---------- Genesis literals (shared by every participant) ---------- */

pub const GENESIS_PREVIOUS_HASH: &str = "AverCoin is a future, and i want to be in it.";

pub const GENESIS_TIMESTAMP: f64 = 1725615747.2513995;

pub const GENESIS_REWARD: u64 = 100;

pub const GENESIS_ADDRESS: &str = "30820122300d06092a864886f70d01010105000382010f003082010a0282010100b0bb73e00ebdc83794c8b926253e6f72a45b8ef487ffe565941fcd74384884a95939fc0e1213db0dfbab83dcd3902af5b6c7391a453324b956aa5be8d58cf2d5b9e9667429ee40abe8a0d0ad831939454b61db63281f2d42665dccc0088f67291926dfdb321efd7b77ad5e571b16acc931aa31046423ba16ae5c1d3d613dcf2331041d90d0f39e0fd85f30238925d00198a765e0f6c721aa7372bc5cb648156dbaf98bfe16aab9eba12545e05253fb9aab932da75067dc432ac9228b42252c1fb4d5851a5108afa063c4b4f1d1795074e66a2c92261a3d976314134bbd3ba7ae0eb1938a936381239d6f6127b846fc42c99a9fcf36984a83a924ed0522ea24830203010001";

/// Current wall-clock time as fractional Unix seconds (microsecond precision).
pub fn unix_now() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}
