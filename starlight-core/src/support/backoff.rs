use std::{cmp::min, time::Duration};

const INITIAL_WAIT_MS: u64 = 100;
const MAXIMUM_WAIT_MS: u64 = 32_000;
const EXP_BASE: u64 = 2;

/// An iterator of exponentially increasing [`Duration`]s for
/// [`tokio::time::sleep`], used by the task basket's retry loop (§4.2,
/// "retries with exponential backoff (base 100 ms)").
pub fn get_backoff_iter() -> impl Iterator<Item = Duration> {
    (0u32..).map(|index| {
        let factor = EXP_BASE.saturating_pow(index);
        let wait_ms = INITIAL_WAIT_MS.saturating_mul(factor);
        Duration::from_millis(min(wait_ms, MAXIMUM_WAIT_MS))
    })
}
