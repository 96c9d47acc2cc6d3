use crate::timing::ms_to_samples;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    NoteOn {
        pitch: u8,
        velocity: u8,
        /// Beats
        length: f32,
    },
    NoteOff {
        pitch: u8,
    },
}

impl Event {
    pub fn pitch(&self) -> u8 {
        match self {
            Event::NoteOn { pitch, .. } | Event::NoteOff { pitch } => *pitch,
        }
    }

    pub fn is_note_on(&self) -> bool {
        matches!(self, Event::NoteOn { .. })
    }
}

/// Output of one `Track::update`: events and their offsets in milliseconds
/// from the start of the window, as parallel sequences in emission order.
#[derive(Debug, Default)]
pub struct EventBuffer {
    events: Vec<Event>,
    offsets: Vec<f32>,
}

impl EventBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            offsets: Vec::with_capacity(capacity),
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.offsets.clear();
    }

    pub fn push(&mut self, event: Event, offset_ms: f32) {
        self.events.push(event);
        self.offsets.push(offset_ms);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn offsets(&self) -> &[f32] {
        &self.offsets
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Event, f32)> {
        self.events.iter().zip(self.offsets.iter().copied())
    }
}

/// Events with offsets converted to sample positions within the block.
#[derive(Debug, Default)]
pub struct SampleEvents {
    events: Vec<Event>,
    offsets: Vec<u32>,
}

impl SampleEvents {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            offsets: Vec::with_capacity(capacity),
        }
    }

    /// Replaces the contents with `buffer` converted to samples, then
    /// separates same-sample off/on pairs.
    pub fn fill_from(&mut self, buffer: &EventBuffer, sample_rate: u32) {
        self.events.clear();
        self.offsets.clear();
        self.events.extend_from_slice(buffer.events());
        self.offsets
            .extend(buffer.offsets().iter().map(|ms| ms_to_samples(*ms, sample_rate)));
        correct_collisions(&self.events, &mut self.offsets);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Event, u32)> {
        self.events.iter().zip(self.offsets.iter().copied())
    }
}

/// Some instruments drop a note-on that lands on the same sample as the
/// note-off of the same pitch. For each adjacent off/on pair sharing pitch
/// and offset, pull the off back one sample, or push the on forward one
/// when already at offset zero. Only the immediately following event is
/// examined.
pub fn correct_collisions(events: &[Event], offsets: &mut [u32]) {
    for i in 0..events.len().saturating_sub(1) {
        let (Event::NoteOff { pitch: off }, Event::NoteOn { pitch: on, .. }) =
            (events[i], events[i + 1])
        else {
            continue;
        };
        if off != on || offsets[i] != offsets[i + 1] {
            continue;
        }
        if offsets[i] > 0 {
            offsets[i] -= 1;
        } else {
            offsets[i + 1] += 1;
        }
    }
}
