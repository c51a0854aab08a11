use std::time::Duration;

pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(10);
pub const SUBSCRIPTION_CHANNEL_CAPACITY: usize = 1024;
