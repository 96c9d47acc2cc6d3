use thiserror::Error;

/// Failures raised while pulling a value out of a generator tree.
///
/// None of these stop a track: the scheduler logs them and skips the event.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenError {
    #[error("weighted choice over an all-zero weight set")]
    InvalidWeights,
    #[error("expected {expected}, found {found}")]
    MalformedValue {
        expected: &'static str,
        found: &'static str,
    },
    #[error("unknown scale '{0}'")]
    UnknownScale(String),
    #[error("pattern has no children")]
    EmptyPattern,
    #[error("pattern already played its repeat budget")]
    Exhausted,
    #[error("pitch {0} is outside the MIDI range")]
    PitchOutOfRange(i32),
}

impl GenError {
    pub(crate) fn malformed(expected: &'static str, found: &'static str) -> Self {
        GenError::MalformedValue { expected, found }
    }
}

#[derive(Debug, Error)]
pub enum SongError {
    #[error("failed to read song: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse song: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("unknown generator '{0}'")]
    UnknownGenerator(String),
    #[error("generator '{0}' refers to itself")]
    CyclicReference(String),
    #[error("invalid tempo {0} bpm")]
    InvalidTempo(f32),
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Generator(#[from] GenError),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("track command queue is full")]
    QueueFull,
    #[error("engine thread is gone")]
    Disconnected,
    #[error("no track at index {0}")]
    UnknownTrack(usize),
    #[error(transparent)]
    Song(#[from] SongError),
}
