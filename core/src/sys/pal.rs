use crate::runtime::pal::{self, PalImpl, TickRatio, Timestamp};

/// Runs the registered platform `init`. Call once before anything else.
#[no_mangle]
pub extern "C" fn executorch_pal_init() {
    pal::init();
}

/// Installs the non-null entries of `table`; null entries keep the current
/// implementation. Returns false for a null table.
///
/// Meant to be called once at process start, before any other thread uses the runtime.
#[no_mangle]
pub unsafe extern "C" fn executorch_register_pal(table: *const PalImpl) -> bool {
    match table.as_ref() {
        Some(table) => pal::register(table),
        None => false,
    }
}

#[no_mangle]
pub extern "C" fn executorch_pal_current_ticks() -> Timestamp {
    pal::current_ticks()
}

#[no_mangle]
pub extern "C" fn executorch_pal_ticks_to_ns_multiplier() -> TickRatio {
    pal::ticks_to_ns_multiplier()
}
