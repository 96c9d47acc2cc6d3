mod instrument;
mod track;

pub use instrument::{Instrument, InstrumentCall, LogInstrument, RecordingInstrument};
pub use track::{CommandConsumer, CommandProducer, Track, TrackCommand, TrackHandle};
