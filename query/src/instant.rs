use std::{ops::Sub, time::Duration};

/// Wall-clock instant that works in both wasm and native targets.
/// Contains the Duration since Unix Epoch (Unix Timestamp).
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(pub Duration);

impl Instant {
    /// Get the current time as a Unix Timestamp.
    pub fn now() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(target_arch = "wasm32")] {
                let millis = js_sys::Date::now();
                Instant(Duration::from_millis(millis as u64))
            } else {
                let duration = std::time::SystemTime::now()
                    .duration_since(std::time::SystemTime::UNIX_EPOCH)
                    .unwrap_or_default();
                Instant(duration)
            }
        }
    }

    /// Time elapsed since this instant. Zero if the clock went backwards.
    pub fn elapsed(&self) -> Duration {
        Instant::now().0.saturating_sub(self.0)
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Instant) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

impl std::fmt::Display for Instant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.as_millis())
    }
}

impl std::fmt::Debug for Instant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Instant").field(&self.0.as_millis()).finish()
    }
}

pub(crate) fn time_until_stale(updated_at: Instant, stale_time: Duration) -> Duration {
    (updated_at.0 + stale_time).saturating_sub(Instant::now().0)
}
