//! Per-part stepping over one update window.
//!
//! A [`Part`] is one running instance of a generator tree. Each update it
//! pulls values until the window is used up: rests consume time, notes are
//! instantaneous and registered in the track-wide [`ActiveNotes`] table,
//! which turns them off once their length has elapsed.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::Tempo;
use crate::error::GenError;
use crate::events::{Event, EventBuffer};
use crate::music::{Cursor, GenRef, Note, Value};

const MIDI_PITCHES: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartId(pub u64);

/// Start alignment requested for a pattern. Recorded on the part but not
/// applied; parts start on the next update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Quantization {
    Beat,
    #[default]
    Bar,
}

/// Sounding notes of a track, keyed by pitch, with the time left in ms
/// measured from the start of the current window.
#[derive(Debug, Clone)]
pub struct ActiveNotes {
    remaining: [Option<f32>; MIDI_PITCHES],
    len: usize,
}

impl Default for ActiveNotes {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveNotes {
    pub fn new() -> Self {
        Self {
            remaining: [None; MIDI_PITCHES],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn remaining(&self, pitch: u8) -> Option<f32> {
        self.remaining.get(pitch as usize).copied().flatten()
    }

    /// Registers a sounding note, returning the entry it replaced.
    pub fn insert(&mut self, pitch: u8, remaining_ms: f32) -> Option<f32> {
        let slot = &mut self.remaining[pitch as usize & 0x7f];
        let previous = slot.replace(remaining_ms);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Turns every sounding note off at offset zero.
    pub fn release_all(&mut self, events: &mut EventBuffer) {
        for pitch in 0..MIDI_PITCHES {
            if self.remaining[pitch].take().is_some() {
                events.push(Event::NoteOff { pitch: pitch as u8 }, 0.0);
            }
        }
        self.len = 0;
    }

    /// Turns off, at offset zero, the notes whose end fell exactly on the
    /// previous window boundary.
    pub fn release_deferred(&mut self, events: &mut EventBuffer) {
        if self.len == 0 {
            return;
        }
        for pitch in 0..MIDI_PITCHES {
            if self.remaining[pitch] == Some(0.0) {
                self.remaining[pitch] = None;
                self.len -= 1;
                events.push(Event::NoteOff { pitch: pitch as u8 }, 0.0);
            }
        }
    }

    /// End-of-window sweep. Notes ending inside the window are turned off at
    /// their end offset; notes ending exactly on the boundary get a zero
    /// marker and are released at the start of the next update; the rest
    /// are carried over.
    pub fn sweep(&mut self, window_ms: f32, events: &mut EventBuffer) {
        if self.len == 0 {
            return;
        }
        for pitch in 0..MIDI_PITCHES {
            let Some(left) = self.remaining[pitch] else {
                continue;
            };
            if left < window_ms {
                self.remaining[pitch] = None;
                self.len -= 1;
                events.push(Event::NoteOff { pitch: pitch as u8 }, left);
            } else if left == window_ms {
                self.remaining[pitch] = Some(0.0);
            } else {
                self.remaining[pitch] = Some(left - window_ms);
            }
        }
    }
}

/// Everything a part writes to while it advances through a window.
pub struct Window<'a, R> {
    pub length_ms: f32,
    pub tempo: Tempo,
    /// Upper bound on pulls per part per window.
    pub max_pulls: usize,
    pub active: &'a mut ActiveNotes,
    pub events: &'a mut EventBuffer,
    pub rng: &'a mut R,
}

impl<R> Window<'_, R> {
    fn note_on(&mut self, note: Note, offset_ms: f32) {
        // Remaining time is counted from the window start, since the sweep
        // subtracts the whole window.
        let remaining = self.tempo.beats_to_ms(note.length) + offset_ms;
        if let Some(previous) = self.active.insert(note.pitch, remaining) {
            self.events.push(
                Event::NoteOff { pitch: note.pitch },
                previous.min(offset_ms),
            );
        }
        self.events.push(
            Event::NoteOn {
                pitch: note.pitch,
                velocity: note.velocity,
                length: note.length,
            },
            offset_ms,
        );
    }
}

#[derive(Debug)]
pub struct Part {
    id: PartId,
    generator: GenRef,
    cursor: Cursor,
    quantize: Quantization,
    /// Rest time carried over from a previous window.
    leftover_ms: f32,
    done: bool,
    /// Pulls that produced neither a note nor a rest.
    skipped: u64,
    /// Set after a failed pull was logged, cleared by the next good one.
    failing: bool,
    /// Set after the pull limit was logged, cleared once a rest is reached.
    runaway: bool,
}

impl Part {
    pub fn new(id: PartId, generator: GenRef, quantize: Quantization) -> Self {
        let cursor = generator.cursor();
        Self {
            id,
            generator,
            cursor,
            quantize,
            leftover_ms: 0.0,
            done: false,
            skipped: 0,
            failing: false,
            runaway: false,
        }
    }

    pub fn id(&self) -> PartId {
        self.id
    }

    pub fn quantize(&self) -> Quantization {
        self.quantize
    }

    pub fn leftover_ms(&self) -> f32 {
        self.leftover_ms
    }

    /// The generator has played its whole pass.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn skipped_pulls(&self) -> u64 {
        self.skipped
    }

    /// Done and no longer waiting out a rest.
    pub fn is_finished(&self) -> bool {
        self.done && self.leftover_ms <= 0.0
    }

    pub fn advance<R: Rng>(&mut self, window: &mut Window<'_, R>) {
        let mut elapsed = 0.0;
        let mut pulls = 0;

        while elapsed < window.length_ms && !self.is_finished() {
            if self.leftover_ms > 0.0 {
                let remaining = window.length_ms - elapsed;
                if self.leftover_ms > remaining {
                    self.leftover_ms -= remaining;
                    return;
                }
                elapsed += self.leftover_ms;
                self.leftover_ms = 0.0;
                continue;
            }
            if self.done {
                return;
            }

            if pulls == window.max_pulls {
                if !self.runaway {
                    tracing::warn!(
                        part = self.id.0,
                        pulls,
                        "part produced no elapsed time, skipping rest of window"
                    );
                    self.runaway = true;
                }
                return;
            }
            pulls += 1;

            let pull = self.generator.generate(&mut self.cursor, &mut *window.rng);
            if pull.can_step || pull.done {
                self.done = true;
            }

            match pull.value {
                Ok(Value::Rest(rest)) => {
                    self.failing = false;
                    self.runaway = false;
                    let length = window.tempo.beats_to_ms(rest.length);
                    let remaining = window.length_ms - elapsed;
                    if length > remaining {
                        self.leftover_ms = length - remaining;
                        return;
                    }
                    elapsed += length;
                }
                Ok(Value::Note(note)) => {
                    self.failing = false;
                    window.note_on(note, elapsed);
                }
                Ok(other) => self.skip(&GenError::malformed("note or rest", other.kind())),
                Err(GenError::EmptyPattern | GenError::Exhausted) => {}
                Err(error) => self.skip(&error),
            }
        }
    }

    /// Counts a pull that produced no event. Only the first of a run of
    /// failures is logged, since this runs inside the audio callback.
    fn skip(&mut self, error: &GenError) {
        self.skipped += 1;
        if !self.failing {
            tracing::warn!(part = self.id.0, %error, "no event this step");
            self.failing = true;
        }
    }
}
