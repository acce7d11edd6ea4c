//! Platform abstraction layer.
//!
//! A process-wide table of the primitives the runtime depends on: init, abort,
//! a tick clock, log emission and raw allocation. The table starts out filled
//! with host defaults and can be overridden once at process start through
//! [`register`]. Entries left empty in the new table keep whatever was
//! registered before. Replacing entries after other threads started using the
//! runtime is unsupported.

use std::ffi::{c_char, c_void, CStr, CString};
use std::ptr::NonNull;
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

use once_cell::sync::Lazy;
use serde::Serialize;

/// Clock reading in platform ticks.
pub type Timestamp = u64;

/// Conversion ratio from ticks to nanoseconds: `ns = ticks * numerator / denominator`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickRatio {
    pub numerator: u64,
    pub denominator: u64,
}

/// Severity of a runtime log record.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug = b'D',
    Info = b'I',
    Error = b'E',
    Fatal = b'F',
    Unknown = b'?',
}

pub type PalInitFn = Option<unsafe extern "C" fn()>;
pub type PalAbortFn = Option<unsafe extern "C" fn()>;
pub type PalCurrentTicksFn = Option<unsafe extern "C" fn() -> Timestamp>;
pub type PalTicksToNsMultiplierFn = Option<unsafe extern "C" fn() -> TickRatio>;
pub type PalEmitLogMessageFn = Option<
    unsafe extern "C" fn(
        timestamp: Timestamp,
        level: LogLevel,
        filename: *const c_char,
        function: *const c_char,
        line: usize,
        message: *const c_char,
        length: usize,
    ),
>;
pub type PalAllocateFn = Option<unsafe extern "C" fn(size: usize) -> *mut c_void>;
pub type PalFreeFn = Option<unsafe extern "C" fn(ptr: *mut c_void)>;

/// Table of platform functions. A `None` entry means "keep the current one".
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PalImpl {
    pub init: PalInitFn,
    pub abort: PalAbortFn,
    pub current_ticks: PalCurrentTicksFn,
    pub ticks_to_ns_multiplier: PalTicksToNsMultiplierFn,
    pub emit_log_message: PalEmitLogMessageFn,
    pub allocate: PalAllocateFn,
    pub free: PalFreeFn,
    /// Nul-terminated name of the file the implementation lives in, or null.
    pub source_filename: *const c_char,
}

// The table only holds function pointers and a pointer to a static string.
unsafe impl Send for PalImpl {}
unsafe impl Sync for PalImpl {}

impl PalImpl {
    const fn defaults() -> Self {
        Self {
            init: Some(default_init),
            abort: Some(default_abort),
            current_ticks: Some(default_current_ticks),
            ticks_to_ns_multiplier: Some(default_ticks_to_ns_multiplier),
            emit_log_message: Some(default_emit_log_message),
            allocate: Some(default_allocate),
            free: Some(default_free),
            source_filename: DEFAULT_SOURCE.as_ptr(),
        }
    }

    /// Overwrites every entry that `other` provides.
    fn merge(&mut self, other: &PalImpl) {
        if other.init.is_some() {
            self.init = other.init;
        }
        if other.abort.is_some() {
            self.abort = other.abort;
        }
        if other.current_ticks.is_some() {
            self.current_ticks = other.current_ticks;
        }
        if other.ticks_to_ns_multiplier.is_some() {
            self.ticks_to_ns_multiplier = other.ticks_to_ns_multiplier;
        }
        if other.emit_log_message.is_some() {
            self.emit_log_message = other.emit_log_message;
        }
        if other.allocate.is_some() {
            self.allocate = other.allocate;
        }
        if other.free.is_some() {
            self.free = other.free;
        }
        if !other.source_filename.is_null() {
            self.source_filename = other.source_filename;
        }
    }
}

const DEFAULT_SOURCE: &CStr = c"executorch_bridge::runtime::pal";

static PAL: Lazy<RwLock<PalImpl>> = Lazy::new(|| RwLock::new(PalImpl::defaults()));
static CLOCK_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

fn table() -> PalImpl {
    *PAL.read().unwrap_or_else(PoisonError::into_inner)
}

/// Installs the non-empty entries of `new_impl`, then runs its `init` if it has one.
pub fn register(new_impl: &PalImpl) -> bool {
    PAL.write()
        .unwrap_or_else(PoisonError::into_inner)
        .merge(new_impl);
    if let Some(init) = new_impl.init {
        unsafe { init() };
    }
    true
}

pub fn init() {
    if let Some(init) = table().init {
        unsafe { init() };
    }
}

/// Calls the registered abort. Falls back to the process abort if it returns.
pub fn abort() -> ! {
    if let Some(abort) = table().abort {
        unsafe { abort() };
    }
    std::process::abort()
}

pub fn current_ticks() -> Timestamp {
    match table().current_ticks {
        Some(f) => unsafe { f() },
        None => 0,
    }
}

pub fn ticks_to_ns_multiplier() -> TickRatio {
    match table().ticks_to_ns_multiplier {
        Some(f) => unsafe { f() },
        None => TickRatio {
            numerator: 1,
            denominator: 1,
        },
    }
}

pub fn emit_log_message(level: LogLevel, filename: &str, function: &str, line: usize, message: &str) {
    let Some(emit) = table().emit_log_message else {
        return;
    };
    let filename = CString::new(filename).unwrap_or_default();
    let function = CString::new(function).unwrap_or_default();
    let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
    unsafe {
        emit(
            current_ticks(),
            level,
            filename.as_ptr(),
            function.as_ptr(),
            line,
            message.as_ptr(),
            message.as_bytes().len(),
        )
    };
}

pub fn allocate(size: usize) -> *mut c_void {
    match table().allocate {
        Some(f) => unsafe { f(size) },
        None => std::ptr::null_mut(),
    }
}

pub fn free(ptr: *mut c_void) {
    if let Some(f) = table().free {
        unsafe { f(ptr) };
    }
}

/// Allocates `size` bytes aligned to `alignment` through the `allocate` entry.
///
/// Returns the aligned address and the raw block; the raw block is what goes
/// back to [`free`].
pub fn allocate_aligned(size: usize, alignment: usize) -> Option<(NonNull<u8>, *mut c_void)> {
    if !alignment.is_power_of_two() {
        return None;
    }
    let padded = size.max(1).checked_add(alignment - 1)?;
    let raw = allocate(padded);
    let base = NonNull::new(raw.cast::<u8>())?;
    let addr = base.as_ptr() as usize;
    let offset = ((addr + alignment - 1) & !(alignment - 1)) - addr;
    NonNull::new(unsafe { base.as_ptr().add(offset) }).map(|aligned| (aligned, raw))
}

unsafe extern "C" fn default_init() {}

unsafe extern "C" fn default_abort() {
    std::process::abort()
}

unsafe extern "C" fn default_current_ticks() -> Timestamp {
    CLOCK_EPOCH.elapsed().as_nanos() as Timestamp
}

unsafe extern "C" fn default_ticks_to_ns_multiplier() -> TickRatio {
    TickRatio {
        numerator: 1,
        denominator: 1,
    }
}

unsafe extern "C" fn default_emit_log_message(
    _timestamp: Timestamp,
    level: LogLevel,
    filename: *const c_char,
    _function: *const c_char,
    line: usize,
    message: *const c_char,
    length: usize,
) {
    let file = lossy(filename, None);
    let message = lossy(message, Some(length));
    match level {
        LogLevel::Debug => tracing::debug!(file = %file, line, "{}", message),
        LogLevel::Info => tracing::info!(file = %file, line, "{}", message),
        LogLevel::Error | LogLevel::Unknown => tracing::error!(file = %file, line, "{}", message),
        LogLevel::Fatal => tracing::error!(file = %file, line, fatal = true, "{}", message),
    }
}

unsafe extern "C" fn default_allocate(size: usize) -> *mut c_void {
    libc::malloc(size)
}

unsafe extern "C" fn default_free(ptr: *mut c_void) {
    libc::free(ptr)
}

unsafe fn lossy(ptr: *const c_char, len: Option<usize>) -> String {
    if ptr.is_null() {
        return String::new();
    }
    match len {
        Some(len) => {
            let bytes = std::slice::from_raw_parts(ptr.cast::<u8>(), len);
            String::from_utf8_lossy(bytes).into_owned()
        }
        None => CStr::from_ptr(ptr).to_string_lossy().into_owned(),
    }
}

/// Emits a log record through the platform table.
macro_rules! et_log {
    ($level:ident, $($arg:tt)+) => {
        $crate::runtime::pal::emit_log_message(
            $crate::runtime::pal::LogLevel::$level,
            file!(),
            module_path!(),
            line!() as usize,
            &format!($($arg)+),
        )
    };
}

/// Logs at fatal level and aborts through the platform table when `cond` is false.
macro_rules! et_check {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::runtime::pal::et_log!(
                Fatal,
                "check failed ({}): {}",
                stringify!($cond),
                format_args!($($arg)+)
            );
            $crate::runtime::pal::abort();
        }
    };
}

pub(crate) use et_check;
pub(crate) use et_log;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_are_monotonic() {
        let a = current_ticks();
        let b = current_ticks();
        assert!(b >= a);
    }

    #[test]
    fn test_empty_registration_keeps_defaults() {
        let empty = PalImpl {
            init: None,
            abort: None,
            current_ticks: None,
            ticks_to_ns_multiplier: None,
            emit_log_message: None,
            allocate: None,
            free: None,
            source_filename: std::ptr::null(),
        };
        assert!(register(&empty));
        assert_eq!(
            ticks_to_ns_multiplier(),
            TickRatio {
                numerator: 1,
                denominator: 1
            }
        );
        let source = unsafe { CStr::from_ptr(table().source_filename) };
        assert_eq!(source, DEFAULT_SOURCE);
    }

    #[test]
    fn test_default_allocation() {
        let ptr = allocate(64);
        assert!(!ptr.is_null());
        free(ptr);

        let (aligned, raw) = allocate_aligned(10, 64).unwrap();
        assert_eq!(aligned.as_ptr() as usize % 64, 0);
        assert!(aligned.as_ptr() as usize - (raw as usize) < 64);
        free(raw);
        assert!(allocate_aligned(8, 3).is_none());
    }

    #[test]
    fn test_log_macro_accepts_format_args() {
        et_log!(Info, "loaded {} methods", 3);
        et_check!(1 + 1 == 2, "arithmetic is broken");
    }
}
