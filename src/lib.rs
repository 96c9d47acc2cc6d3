pub mod audio;
pub mod engine;
pub mod error;
pub mod events;
pub mod music;
pub mod song;
pub mod timing;

pub use audio::{Instrument, LogInstrument, RecordingInstrument, Track, TrackHandle};
pub use engine::{
    Conductor, EngineCommand, EngineConfig, EngineHandle, EngineUpdate, InstrumentFactory,
    spawn_engine,
};
pub use error::{EngineError, GenError, SongError};
pub use events::{Event, EventBuffer, SampleEvents};
pub use song::{CompiledSong, CompiledTrack, GeneratorSpec, Song};
