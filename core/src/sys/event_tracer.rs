use std::mem::MaybeUninit;

use crate::runtime::event_tracer as rt;

use super::array::ArrayRefU8;
use super::handles::{EventTracerKind, EventTracerRefMut};
use super::layout::{cast_mut, destroy, place, shadow};

/// Storage for the event tracer that records per-instruction profiling events.
#[repr(C)]
pub struct ETDumpGen {
    _blob: [MaybeUninit<usize>; 6],
}

shadow! {
    ETDumpGen => rt::ETDumpGen,
}

#[no_mangle]
pub unsafe extern "C" fn executorch_ETDumpGen_new(out: *mut ETDumpGen) {
    place(out, rt::ETDumpGen::new());
}

#[no_mangle]
pub unsafe extern "C" fn executorch_ETDumpGen_destructor(this: *mut ETDumpGen) {
    destroy(this);
}

#[no_mangle]
pub unsafe extern "C" fn executorch_ETDumpGen_as_event_tracer(this: *mut ETDumpGen) -> EventTracerRefMut {
    EventTracerRefMut {
        ptr: this.cast(),
        kind: EventTracerKind::ETDump as u32,
    }
}

/// Serializes the events recorded so far as JSON.
///
/// The bytes belong to the tracer and stay valid until the next call or until
/// the tracer is destroyed.
#[no_mangle]
pub unsafe extern "C" fn executorch_ETDumpGen_get_etdump_data(this: *mut ETDumpGen) -> ArrayRefU8 {
    let data = cast_mut(this).get_etdump_data();
    ArrayRefU8 {
        data: data.as_ptr(),
        len: data.len(),
    }
}
