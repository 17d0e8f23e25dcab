//! Exponential backoff with jitter for the retry scheduler.

use rand::Rng;

/// Default base delay before the first retry, in seconds.
pub const DEFAULT_BASE_DELAY_SECS: u64 = 60;
/// Default ceiling on the backoff delay, in seconds.
pub const DEFAULT_MAX_DELAY_SECS: u64 = 900;

/// Compute the number of seconds to wait before retrying after `attempt`
/// completed (failed) attempts.
///
/// `delay = min(base * 2^attempt, maxDelay)`, then a uniform jitter in
/// `[0, 0.1 * delay]` is added and the result floored to an integer. The
/// contract only requires the result to land in `[delay, 1.1 * delay]`; the
/// jitter distribution itself is not specified beyond that bound.
pub fn delay_for(attempt: u32, base_secs: u64, max_delay_secs: u64) -> u64 {
    delay_for_with_rng(attempt, base_secs, max_delay_secs, &mut rand::rng())
}

fn delay_for_with_rng(attempt: u32, base_secs: u64, max_delay_secs: u64, rng: &mut impl Rng) -> u64 {
    let exponent = attempt.min(32); // guard against overflow on pathological inputs
    let delay = ((base_secs as f64) * 2f64.powi(exponent as i32)).min(max_delay_secs as f64);

    if delay <= 0.0 {
        return 0;
    }

    let jitter = rng.random_range(0.0..(delay * 0.1));
    (delay + jitter).floor() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_scales_with_attempt_below_the_cap() {
        // attempt=0 -> ~60s, attempt=1 -> ~120s, well below the 900s cap.
        let d0 = delay_for(0, 60, 900);
        let d1 = delay_for(1, 60, 900);
        assert!((60..=66).contains(&d0));
        assert!((120..=132).contains(&d1));
    }

    #[test]
    fn delay_never_exceeds_110_percent_of_clamped_base() {
        let base = 60;
        let max_delay = 900;
        for attempt in 0..10 {
            for _ in 0..200 {
                let clamped = ((base as f64) * 2f64.powi(attempt as i32)).min(max_delay as f64);
                let d = delay_for(attempt, base, max_delay) as f64;
                assert!(d >= clamped, "delay {d} below clamped {clamped}");
                assert!(d <= clamped * 1.1, "delay {d} above 110% of {clamped}");
            }
        }
    }

    #[test]
    fn delay_is_capped_at_max_delay_for_large_attempts() {
        let d = delay_for(20, 60, 900) as f64;
        assert!(d >= 900.0);
        assert!(d <= 990.0);
    }

    #[test]
    fn zero_base_delay_yields_zero() {
        assert_eq!(delay_for(3, 0, 900), 0);
    }
}
