use std::sync::Arc;

use parking_lot::Mutex;

/// Sound-producing sink for one track. Offsets and lengths are in samples
/// relative to the start of the current block.
pub trait Instrument: Send {
    fn note_on(&mut self, offset: u32, pitch: u8, velocity: u8, length: u32);
    fn note_off(&mut self, offset: u32, pitch: u8);
    fn program_change(&mut self, offset: u32, program: u8);
}

/// Writes every call to the log.
#[derive(Debug, Clone)]
pub struct LogInstrument {
    name: String,
}

impl LogInstrument {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Instrument for LogInstrument {
    fn note_on(&mut self, offset: u32, pitch: u8, velocity: u8, length: u32) {
        tracing::debug!(instrument = %self.name, offset, pitch, velocity, length, "note on");
    }

    fn note_off(&mut self, offset: u32, pitch: u8) {
        tracing::debug!(instrument = %self.name, offset, pitch, "note off");
    }

    fn program_change(&mut self, offset: u32, program: u8) {
        tracing::debug!(instrument = %self.name, offset, program, "program change");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentCall {
    NoteOn {
        offset: u32,
        pitch: u8,
        velocity: u8,
        length: u32,
    },
    NoteOff {
        offset: u32,
        pitch: u8,
    },
    ProgramChange {
        offset: u32,
        program: u8,
    },
}

/// Keeps every call, readable from another thread through a shared log.
#[derive(Debug, Clone, Default)]
pub struct RecordingInstrument {
    calls: Arc<Mutex<Vec<InstrumentCall>>>,
}

impl RecordingInstrument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Arc<Mutex<Vec<InstrumentCall>>> {
        self.calls.clone()
    }

    /// Returns and clears the calls recorded so far.
    pub fn take(&self) -> Vec<InstrumentCall> {
        std::mem::take(&mut *self.calls.lock())
    }
}

impl Instrument for RecordingInstrument {
    fn note_on(&mut self, offset: u32, pitch: u8, velocity: u8, length: u32) {
        self.calls.lock().push(InstrumentCall::NoteOn {
            offset,
            pitch,
            velocity,
            length,
        });
    }

    fn note_off(&mut self, offset: u32, pitch: u8) {
        self.calls.lock().push(InstrumentCall::NoteOff { offset, pitch });
    }

    fn program_change(&mut self, offset: u32, program: u8) {
        self.calls
            .lock()
            .push(InstrumentCall::ProgramChange { offset, program });
    }
}
