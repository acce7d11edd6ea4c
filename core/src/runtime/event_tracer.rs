//! Event tracing of method execution.

use serde::Serialize;

use super::pal::{self, et_log, TickRatio, Timestamp};

/// Token returned by [`EventTracer::start_profiling`] and handed back to
/// [`EventTracer::end_profiling`].
#[derive(Debug, Clone, Copy)]
pub struct EventTracerEntry {
    pub event_id: usize,
    pub instruction_id: usize,
    pub start_time: Timestamp,
}

/// Receives profiling events while a method runs.
pub trait EventTracer {
    fn start_profiling(&mut self, name: &str, instruction_id: usize) -> EventTracerEntry;

    fn end_profiling(&mut self, entry: EventTracerEntry);
}

#[derive(Debug, Clone, Serialize)]
struct ProfileEvent {
    name: String,
    instruction_id: usize,
    start_ticks: Timestamp,
    end_ticks: Option<Timestamp>,
}

#[derive(Serialize)]
struct Dump<'a> {
    tick_ratio: TickRatio,
    events: &'a [ProfileEvent],
}

/// Event tracer that records every event and serializes them to JSON on request.
#[repr(C)]
#[derive(Debug, Default)]
pub struct ETDumpGen {
    events: Vec<ProfileEvent>,
    dump: Vec<u8>,
}

impl ETDumpGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_events(&self) -> usize {
        self.events.len()
    }

    /// Serializes the recorded events. The returned bytes stay valid until the
    /// next call or until the tracer is dropped. A failed serialization is
    /// logged and leaves the dump empty.
    pub fn get_etdump_data(&mut self) -> &[u8] {
        let dump = Dump {
            tick_ratio: pal::ticks_to_ns_multiplier(),
            events: &self.events,
        };
        match serde_json::to_vec(&dump) {
            Ok(bytes) => self.dump = bytes,
            Err(e) => {
                et_log!(Error, "could not serialize the event dump: {}", e);
                self.dump.clear();
            }
        }
        &self.dump
    }
}

impl EventTracer for ETDumpGen {
    fn start_profiling(&mut self, name: &str, instruction_id: usize) -> EventTracerEntry {
        let entry = EventTracerEntry {
            event_id: self.events.len(),
            instruction_id,
            start_time: pal::current_ticks(),
        };
        self.events.push(ProfileEvent {
            name: name.to_string(),
            instruction_id,
            start_ticks: entry.start_time,
            end_ticks: None,
        });
        entry
    }

    fn end_profiling(&mut self, entry: EventTracerEntry) {
        if let Some(event) = self.events.get_mut(entry.event_id) {
            event.end_ticks = Some(pal::current_ticks());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_events() {
        let mut tracer = ETDumpGen::new();
        let entry = tracer.start_profiling("aten::add.out", 0);
        tracer.end_profiling(entry);
        assert_eq!(tracer.num_events(), 1);

        let dump: serde_json::Value = serde_json::from_slice(tracer.get_etdump_data()).unwrap();
        assert_eq!(dump["events"][0]["name"], "aten::add.out");
        assert!(dump["events"][0]["end_ticks"].is_u64());

        // Each call rebuilds the dump from the current events.
        let entry = tracer.start_profiling("aten::mul.out", 1);
        tracer.end_profiling(entry);
        let dump: serde_json::Value = serde_json::from_slice(tracer.get_etdump_data()).unwrap();
        assert_eq!(dump["events"].as_array().map(Vec::len), Some(2));
        assert_eq!(dump["events"][1]["name"], "aten::mul.out");
    }
}
