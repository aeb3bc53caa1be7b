//! Time provider contracts (§6) and the two concrete implementations this
//! crate supplements to make the schedulers runnable standalone: a
//! wall-clock [`SystemTimeProvider`] for the realtime schedulers and a
//! [`VirtualTimeProvider`] cursor for the discrete scheduler and for
//! deterministic tests of the realtime ones.

use crate::error::ConfigError;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Minimal time source consumed by every scheduler. Units are opaque to the
/// core — a discrete scheduler's `f64` is virtual ticks, a realtime
/// scheduler's is wall-clock milliseconds (or whatever the provider defines).
pub trait TimeProvider: Send + Sync {
    fn now(&self) -> f64;

    /// Returns `Some(self)` re-typed as [`UnitTimeProvider`] when this
    /// provider supports unit-aware conversions. Default `None`; the two
    /// concrete providers below override it.
    fn as_unit_provider(&self) -> Option<&dyn UnitTimeProvider> {
        None
    }
}

/// Extension implemented by time providers that can convert their opaque
/// `f64` to and from absolute instants and durations. Schedulers that need
/// unit-aware scheduling (e.g. the executor scheduler's "schedule in X ms"
/// translation) require this; calling a unit-aware API against a provider
/// that only implements [`TimeProvider`] fails with
/// [`ConfigError::UnitProviderRequired`].
pub trait UnitTimeProvider: TimeProvider {
    fn to_instant(&self, t: f64) -> DateTime<Utc>;
    fn from_instant(&self, instant: DateTime<Utc>) -> f64;
    fn duration_from_f64(&self, d: f64) -> Duration;
    fn f64_from_duration(&self, d: Duration) -> f64;
}

/// Downcast helper: ask a `&dyn TimeProvider` whether it also implements
/// [`UnitTimeProvider`], failing loudly per §6 rather than silently
/// degrading.
pub fn require_unit_provider<'a>(
    provider: &'a (dyn TimeProvider + 'a),
) -> Result<&'a (dyn UnitTimeProvider + 'a), ConfigError> {
    provider.as_unit_provider().ok_or(ConfigError::UnitProviderRequired)
}

/// Wall-clock provider: `now()` returns milliseconds since construction,
/// measured with a monotonic [`Instant`]. Also implements
/// [`UnitTimeProvider`] by anchoring `t=0` to the construction wall-clock
/// time.
pub struct SystemTimeProvider {
    start_instant: Instant,
    start_wall: DateTime<Utc>,
}

impl SystemTimeProvider {
    pub fn new() -> Self {
        Self {
            start_instant: Instant::now(),
            start_wall: Utc::now(),
        }
    }
}

impl Default for SystemTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> f64 {
        self.start_instant.elapsed().as_secs_f64() * 1000.0
    }

    fn as_unit_provider(&self) -> Option<&dyn UnitTimeProvider> {
        Some(self)
    }
}

impl UnitTimeProvider for SystemTimeProvider {
    fn to_instant(&self, t: f64) -> DateTime<Utc> {
        self.start_wall + chrono::Duration::milliseconds(t as i64)
    }

    fn from_instant(&self, instant: DateTime<Utc>) -> f64 {
        (instant - self.start_wall).num_milliseconds() as f64
    }

    fn duration_from_f64(&self, d: f64) -> Duration {
        Duration::from_secs_f64((d.max(0.0)) / 1000.0)
    }

    fn f64_from_duration(&self, d: Duration) -> f64 {
        d.as_secs_f64() * 1000.0
    }
}

/// A manually-advanced virtual clock. The discrete scheduler owns one of
/// these and moves it forward as events execute (§4.4); nothing else should
/// write to it concurrently, hence the lock-free atomic bit pattern rather
/// than a mutex — reads are far more frequent than the single-threaded
/// writes.
#[derive(Debug)]
pub struct VirtualTimeProvider {
    bits: AtomicU64,
    epoch: DateTime<Utc>,
}

impl VirtualTimeProvider {
    pub fn new(start: f64) -> Self {
        Self {
            bits: AtomicU64::new(start.to_bits()),
            epoch: Utc.timestamp_opt(0, 0).single().unwrap(),
        }
    }

    /// Advance the clock to `t`. No-ops (never goes backwards) if `t` is
    /// behind the current value; callers that need strict monotonic
    /// advancement should check via `now()` first.
    pub fn advance_to(&self, t: f64) {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let current_f = f64::from_bits(current);
            if t <= current_f {
                return;
            }
            match self.bits.compare_exchange_weak(
                current,
                t.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Default for VirtualTimeProvider {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl TimeProvider for VirtualTimeProvider {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    fn as_unit_provider(&self) -> Option<&dyn UnitTimeProvider> {
        Some(self)
    }
}

impl UnitTimeProvider for VirtualTimeProvider {
    fn to_instant(&self, t: f64) -> DateTime<Utc> {
        self.epoch + chrono::Duration::milliseconds(t as i64)
    }

    fn from_instant(&self, instant: DateTime<Utc>) -> f64 {
        (instant - self.epoch).num_milliseconds() as f64
    }

    fn duration_from_f64(&self, d: f64) -> Duration {
        Duration::from_secs_f64(d.max(0.0))
    }

    fn f64_from_duration(&self, d: Duration) -> f64 {
        d.as_secs_f64()
    }
}
