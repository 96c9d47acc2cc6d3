use serde::{Deserialize, Serialize};

use crate::error::SongError;

/// Musical tempo, used to turn beat lengths into wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tempo {
    bpm: f32,
}

impl Tempo {
    pub fn new(bpm: f32) -> Result<Self, SongError> {
        if bpm.is_finite() && bpm > 0.0 {
            Ok(Self { bpm })
        } else {
            Err(SongError::InvalidTempo(bpm))
        }
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    pub fn beat_ms(&self) -> f32 {
        60_000.0 / self.bpm
    }

    pub fn beats_to_ms(&self, beats: f32) -> f32 {
        self.beat_ms() * beats
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self { bpm: 120.0 }
    }
}

/// Duration of an audio block in milliseconds.
pub fn block_ms(frames: usize, sample_rate: u32) -> f32 {
    frames as f32 / sample_rate as f32 * 1000.0
}

/// Milliseconds to a whole number of samples, truncating.
pub fn ms_to_samples(ms: f32, sample_rate: u32) -> u32 {
    (ms / 1000.0 * sample_rate as f32).max(0.0) as u32
}
