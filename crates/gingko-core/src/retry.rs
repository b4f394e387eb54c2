use crate::config::RetrySettings;
use crate::error::Error;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Ceiling on a single backoff sleep.
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Run `op`, retrying transient store errors with exponential backoff.
///
/// At most `settings.max_attempts` calls are made; the last error is returned
/// once they are exhausted. Non-transient errors return immediately.
pub fn with_backoff<T, F>(settings: &RetrySettings, what: &str, mut op: F) -> Result<T, Error>
where
    F: FnMut() -> Result<T, Error>,
{
    let max_attempts = settings.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = backoff_delay(settings.base_delay(), attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {}ms",
                    what,
                    attempt,
                    max_attempts,
                    e,
                    delay.as_millis()
                );
                thread::sleep(delay);
                attempt += 1;
            }
            result => return result,
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(MAX_DELAY)
}
