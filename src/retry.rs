//! Blocking retry loops for startup and reconnection

use crate::BridgeError;
use embedded_hal::delay::DelayNs;

/// How long to wait between attempts and when to give up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval_ms: u32,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Retry until the operation succeeds
    pub const fn forever(interval_ms: u32) -> Self {
        Self {
            interval_ms,
            max_attempts: None,
        }
    }

    /// Give up after `max_attempts` failed attempts
    pub const fn bounded(interval_ms: u32, max_attempts: u32) -> Self {
        Self {
            interval_ms,
            max_attempts: Some(max_attempts),
        }
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Run `attempt` until it returns `Ok`, sleeping `interval_ms` between tries.
///
/// `on_failure` is called with the attempt number and error after every
/// failed attempt. With a bounded policy the last error is replaced by
/// [`BridgeError::RetriesExhausted`].
pub fn retry<T, D, F, L>(
    policy: &RetryPolicy,
    delay: &mut D,
    mut attempt: F,
    mut on_failure: L,
) -> Result<T, BridgeError>
where
    D: DelayNs,
    F: FnMut() -> Result<T, BridgeError>,
    L: FnMut(u32, BridgeError),
{
    let mut attempts: u32 = 0;

    loop {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempts = attempts.saturating_add(1);
                on_failure(attempts, e);

                if policy.exhausted(attempts) {
                    return Err(BridgeError::RetriesExhausted(attempts));
                }

                delay.delay_ms(policy.interval_ms);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Delay that records requested sleeps instead of sleeping
    #[derive(Default)]
    pub(crate) struct RecordingDelay {
        pub total_ms: u64,
        pub calls: u32,
    }

    impl DelayNs for RecordingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.total_ms += u64::from(ns) / 1_000_000;
            self.calls += 1;
        }

        fn delay_ms(&mut self, ms: u32) {
            self.total_ms += u64::from(ms);
            self.calls += 1;
        }
    }

    #[test]
    fn returns_first_success_without_sleeping() {
        let mut delay = RecordingDelay::default();
        let result = retry(
            &RetryPolicy::forever(500),
            &mut delay,
            || Ok::<_, BridgeError>(7),
            |_, _| panic!("no failure expected"),
        );

        assert_eq!(result, Ok(7));
        assert_eq!(delay.calls, 0);
    }

    #[test]
    fn forever_policy_keeps_trying_until_success() {
        let mut delay = RecordingDelay::default();
        let mut remaining_failures = 5;
        let mut failures_seen = 0;

        let result = retry(
            &RetryPolicy::forever(500),
            &mut delay,
            || {
                if remaining_failures > 0 {
                    remaining_failures -= 1;
                    Err(BridgeError::SensorError)
                } else {
                    Ok(())
                }
            },
            |attempt, e| {
                failures_seen = attempt;
                assert_eq!(e, BridgeError::SensorError);
            },
        );

        assert_eq!(result, Ok(()));
        assert_eq!(failures_seen, 5);
        assert_eq!(delay.total_ms, 2500);
    }

    #[test]
    fn bounded_policy_gives_up() {
        let mut delay = RecordingDelay::default();
        let result: Result<(), _> = retry(
            &RetryPolicy::bounded(100, 3),
            &mut delay,
            || Err(BridgeError::WiFiError),
            |_, _| {},
        );

        assert_eq!(result, Err(BridgeError::RetriesExhausted(3)));
        // No sleep after the final attempt
        assert_eq!(delay.total_ms, 200);
    }
}
