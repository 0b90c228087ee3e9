use std::time::{SystemTime, UNIX_EPOCH};

/// Network-adjusted wall clock, in unix seconds.
///
/// Peer time offsets live in the network layer, which is outside this
/// crate; here the local clock stands in for the adjusted time.
pub fn adjusted_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
