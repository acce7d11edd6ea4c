//! Process-wide platform hooks: clock, logging, abort and raw allocation.
//!
//! Defaults route runtime logs into `tracing`. A host may replace individual
//! entries once, at startup, with [`register`].

use std::time::Duration;

use crate::sys::{self, PalImpl, TickRatio, Timestamp};

/// Runs the registered platform `init`.
pub fn init() {
    sys::executorch_pal_init();
}

/// Installs every entry `table` provides and runs its `init`.
///
/// Call before any other thread touches the runtime.
pub fn register(table: &PalImpl) -> bool {
    unsafe { sys::executorch_register_pal(table) }
}

pub fn current_ticks() -> Timestamp {
    sys::executorch_pal_current_ticks()
}

pub fn ticks_to_ns_multiplier() -> TickRatio {
    sys::executorch_pal_ticks_to_ns_multiplier()
}

/// Converts a tick count with the registered ratio.
pub fn ticks_to_duration(ticks: Timestamp) -> Duration {
    let ratio = ticks_to_ns_multiplier();
    if ratio.denominator == 0 {
        return Duration::ZERO;
    }
    let nanos = ticks as u128 * ratio.numerator as u128 / ratio.denominator as u128;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
