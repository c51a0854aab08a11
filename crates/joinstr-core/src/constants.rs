// Secure channel
pub const SHARED_SECRET_LENGTH: usize = 32;
pub const IV_LENGTH: usize = 16;
pub const ENCRYPTED_IV_DELIMITER: &str = "?iv=";

// Pools
pub const POOL_ID_RANDOM_LENGTH: usize = 10;
pub const MIN_POOL_PEERS: u32 = 2;
pub const DEFAULT_POOL_TIMEOUT_SECONDS: u64 = 600; // 10 minutes
