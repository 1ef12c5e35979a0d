use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static FIELD_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

/// Allocates a field id that is unique for the lifetime of the process.
///
/// The id combines a millisecond timestamp with a monotonic counter, so two
/// calls never collide even within the same millisecond, and ids minted in
/// separate authoring sessions remain distinguishable in persisted payloads.
pub fn unique_field_id() -> String {
    let serial = FIELD_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst);
    format!("field_{}_{:x}", timestamp_millis(), mix(serial))
}

fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}

// SplitMix64 step; keeps consecutive serials from producing near-identical
// suffixes in the rendered id.
fn mix(serial: u64) -> u64 {
    let mut value = serial.wrapping_add(0x9e3779b97f4a7c15);
    value = (value ^ (value >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    value = (value ^ (value >> 27)).wrapping_mul(0x94d049bb133111eb);
    value ^ (value >> 31)
}
