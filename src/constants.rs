/// Head distance at which the pipeline flips from SYNC to HEAD.
pub const HEAD_TRANSITION_DISTANCE: u32 = 100;

/// Delay between reconnect attempts to the state-history endpoint.
pub const RECONNECT_BACKOFF_MS: u64 = 5_000;

/// State-history frames can carry whole blocks plus deltas.
pub const MAX_WS_FRAME_BYTES: usize = 512 * 1024 * 1024;

pub const EVM_CONTRACT: &str = "eosio.evm";
pub const TOKEN_CONTRACT: &str = "eosio.token";
pub const MSIG_CONTRACT: &str = "eosio.msig";
pub const SYSTEM_ACCOUNT: &str = "eosio";
pub const GLOBAL_TABLE: &str = "global";

/// System accounts whose transfers into eosio.evm are not deposits.
pub const TRANSFER_BLACKLIST: [&str; 3] = ["eosio", "eosio.stake", "eosio.ram"];

/// Action names relevant to EVM translation.
pub const EVM_ACTIONS: [&str; 4] = ["raw", "withdraw", "transfer", "exec"];

pub const DEFAULT_WORKER_AMOUNT: usize = 4;
pub const DEFAULT_MAX_MSGS_IN_FLIGHT: u32 = 10_000;
pub const DEFAULT_CONCURRENCY_AMOUNT: usize = 8;
pub const DEFAULT_MIN_BLOCK_CONFIRMATION: u32 = 200;

pub const ZERO_HASH_HEX: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000000";

/// 256-byte bloom of all zeroes, hex encoded.
pub fn empty_logs_bloom() -> String {
    format!("0x{}", "00".repeat(256))
}
