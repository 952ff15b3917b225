//! Timestamp-driven gate for the expensive detection pass.

/// Decides whether a periodic operation should fire at a given timestamp.
///
/// - negative frequency: never fires
/// - zero frequency: fires on every call
/// - positive frequency: fires on the first call, then whenever at least
///   `frequency` ms have elapsed since the last firing
///
/// After a firing the reference point snaps down to the frequency grid
/// (`now - now % frequency`) rather than to `now`, which absorbs jitter in
/// the caller's timing. Timestamps must be non-decreasing.
#[derive(Debug, Clone)]
pub struct PeriodicTrigger {
    frequency_ms: i64,
    last_fired_ms: Option<i64>,
}

impl PeriodicTrigger {
    pub fn new(frequency_ms: i64) -> Self {
        Self {
            frequency_ms,
            last_fired_ms: None,
        }
    }

    pub fn frequency_ms(&self) -> i64 {
        self.frequency_ms
    }

    pub fn is_disabled(&self) -> bool {
        self.frequency_ms < 0
    }

    /// Returns `true` if the operation should run at `now_ms`.
    ///
    /// A `false` return leaves the trigger untouched.
    pub fn should_fire(&mut self, now_ms: i64) -> bool {
        if self.frequency_ms < 0 {
            return false;
        }
        if self.frequency_ms == 0 {
            return true;
        }

        let Some(last) = self.last_fired_ms else {
            self.last_fired_ms = Some(now_ms);
            return true;
        };

        if now_ms.saturating_sub(last) >= self.frequency_ms {
            self.last_fired_ms = Some(now_ms - now_ms.rem_euclid(self.frequency_ms));
            true
        } else {
            false
        }
    }
}
