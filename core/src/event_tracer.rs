//! Profiling of method execution.

use crate::sys;
use crate::util::Slot;

/// Records one event per executed instruction and dumps them as JSON.
pub struct ETDumpGen {
    inner: Slot<sys::ETDumpGen>,
}

impl ETDumpGen {
    pub fn new() -> Self {
        Self {
            inner: unsafe { Slot::new(|out| sys::executorch_ETDumpGen_new(out)) },
        }
    }

    /// JSON dump of the events recorded so far.
    pub fn get_etdump_data(&mut self) -> &[u8] {
        unsafe { sys::executorch_ETDumpGen_get_etdump_data(self.inner.as_mut_ptr()).as_slice() }
    }

    pub(crate) fn event_tracer_handle(&mut self) -> sys::EventTracerRefMut {
        unsafe { sys::executorch_ETDumpGen_as_event_tracer(self.inner.as_mut_ptr()) }
    }
}

impl Default for ETDumpGen {
    fn default() -> Self {
        Self::new()
    }
}
