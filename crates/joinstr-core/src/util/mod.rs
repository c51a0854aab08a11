use rand::Rng;

use crate::constants::POOL_ID_RANDOM_LENGTH;
use crate::protocol::Timestamp;

/// Random lowercase letters followed by the creation time in seconds
pub fn generate_pool_id(created_at: Timestamp) -> String {
    let mut rng = rand::thread_rng();
    let prefix: String = (0..POOL_ID_RANDOM_LENGTH)
        .map(|_| rng.gen_range(b'a'..=b'z') as char)
        .collect();
    format!("{prefix}{created_at}")
}
