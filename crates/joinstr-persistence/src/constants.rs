// DB constants
pub const DB_POOLS_TABLE: &str = "pools";
pub const DB_HISTORY_TABLE: &str = "history";
pub const DB_COLLECTION_ID: &str = "collection";

pub const SURREAL_DB_CONNECTION: &str = "rocksdb://data/joinstr";
pub const SURREAL_DB_NAMESPACE: &str = "default";
pub const SURREAL_DB_DATABASE: &str = "joinstr";
