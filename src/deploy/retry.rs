use std::{thread, time::Duration};

/// Bounded polling: at most `max_attempts` tries, `interval` apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    /// Calls `attempt` until it yields a value, fails, or the attempts run
    /// out. `Ok(None)` means every attempt came back empty.
    pub fn poll<T, E>(
        &self,
        mut attempt: impl FnMut(u32) -> Result<Option<T>, E>,
    ) -> Result<Option<T>, E> {
        for n in 1..=self.max_attempts {
            if let Some(value) = attempt(n)? {
                return Ok(Some(value));
            }
            if n < self.max_attempts && !self.interval.is_zero() {
                thread::sleep(self.interval);
            }
        }
        Ok(None)
    }
}
