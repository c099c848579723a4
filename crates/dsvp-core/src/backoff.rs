//! Reconnect backoff for worker sessions.
//!
//! The delay comes from a fixed ascending scale indexed by the retry count.
//! Counts past the end of the scale stay at the last (largest) entry, so a
//! worker that keeps failing settles at one attempt every ten seconds.

use std::time::Duration;

/// Delay scale in milliseconds, indexed by retry count.
pub const BACKOFF_SCALE_MS: [u64; 5] = [250, 1000, 2000, 5000, 10_000];

/// Retry count forced after the server rejects our credential.
///
/// Anything at or beyond the scale length maps to the maximum delay.
pub const AUTH_REJECTED_RETRIES: u32 = 999;

/// Delay in milliseconds before the next connect attempt.
#[must_use]
pub fn delay_ms(retries: u32) -> u64 {
    let index = usize::try_from(retries).unwrap_or(usize::MAX);
    BACKOFF_SCALE_MS
        .get(index)
        .copied()
        .unwrap_or(BACKOFF_SCALE_MS[BACKOFF_SCALE_MS.len() - 1])
}

/// [`delay_ms`] as a [`Duration`].
#[must_use]
pub fn delay(retries: u32) -> Duration {
    Duration::from_millis(delay_ms(retries))
}

/// Largest delay the scale can produce.
#[must_use]
pub fn max_delay() -> Duration {
    Duration::from_millis(BACKOFF_SCALE_MS[BACKOFF_SCALE_MS.len() - 1])
}
