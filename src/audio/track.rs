//! Tracks and their control handles.
//!
//! A [`Track`] lives on the audio side and is only touched by the block
//! callback. Its paired [`TrackHandle`] lives on the control side; parts are
//! built there and handed across through a lock-free ring that the track
//! drains at the top of every update.

use rand::SeedableRng;
use rand::rngs::StdRng;
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Producer, Split};

use crate::engine::EngineConfig;
use crate::error::EngineError;
use crate::events::EventBuffer;
use crate::music::GenRef;
use crate::timing::{ActiveNotes, Part, PartId, Quantization, Tempo, Window};

pub enum TrackCommand {
    Add(Part),
    Remove(PartId),
    Clear,
    StopAllNotes,
    SetTempo(Tempo),
}

pub type CommandProducer = ringbuf::HeapProd<TrackCommand>;
pub type CommandConsumer = ringbuf::HeapCons<TrackCommand>;

pub struct TrackHandle {
    id: usize,
    producer: CommandProducer,
    next_part: u64,
}

impl TrackHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Starts a new part playing `generator` from the next update on.
    pub fn add_pattern(
        &mut self,
        generator: GenRef,
        quantize: Quantization,
    ) -> Result<PartId, EngineError> {
        let id = PartId(self.next_part);
        self.send(TrackCommand::Add(Part::new(id, generator, quantize)))?;
        self.next_part += 1;
        Ok(id)
    }

    /// Removes a part; notes it left sounding ring out normally.
    pub fn remove(&mut self, id: PartId) -> Result<(), EngineError> {
        self.send(TrackCommand::Remove(id))
    }

    pub fn clear(&mut self) -> Result<(), EngineError> {
        self.send(TrackCommand::Clear)
    }

    pub fn stop_all_notes(&mut self) -> Result<(), EngineError> {
        self.send(TrackCommand::StopAllNotes)
    }

    pub fn set_tempo(&mut self, tempo: Tempo) -> Result<(), EngineError> {
        self.send(TrackCommand::SetTempo(tempo))
    }

    fn send(&mut self, command: TrackCommand) -> Result<(), EngineError> {
        self.producer
            .try_push(command)
            .map_err(|_| EngineError::QueueFull)
    }
}

pub struct Track {
    id: usize,
    name: String,
    parts: Vec<Part>,
    active: ActiveNotes,
    events: EventBuffer,
    rng: StdRng,
    tempo: Tempo,
    max_pulls: usize,
    commands: CommandConsumer,
}

impl Track {
    pub fn new(id: usize, name: impl Into<String>, config: &EngineConfig) -> (Self, TrackHandle) {
        let (producer, commands) = HeapRb::<TrackCommand>::new(config.command_capacity.max(1)).split();
        let track = Self {
            id,
            name: name.into(),
            parts: Vec::with_capacity(config.command_capacity),
            active: ActiveNotes::new(),
            events: EventBuffer::with_capacity(config.event_capacity),
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(id as u64)),
            tempo: config.tempo(),
            max_pulls: config.max_pulls_per_window,
            commands,
        };
        let handle = TrackHandle {
            id,
            producer,
            next_part: 0,
        };
        (track, handle)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    pub fn set_tempo(&mut self, tempo: Tempo) {
        self.tempo = tempo;
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn active_notes(&self) -> &ActiveNotes {
        &self.active
    }

    /// Random source shared by every part of the track.
    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Advances every part by `window_ms` and returns the events of this
    /// window with their millisecond offsets. The buffer is reused and
    /// overwritten by the next call.
    pub fn update(&mut self, window_ms: f32) -> &EventBuffer {
        self.events.clear();
        self.drain_commands();

        self.active.release_deferred(&mut self.events);

        let mut window = Window {
            length_ms: window_ms,
            tempo: self.tempo,
            max_pulls: self.max_pulls,
            active: &mut self.active,
            events: &mut self.events,
            rng: &mut self.rng,
        };
        for part in &mut self.parts {
            part.advance(&mut window);
        }

        self.active.sweep(window_ms, &mut self.events);
        &self.events
    }

    /// Applies queued commands without advancing time. Any note offs they
    /// produce are returned at offset zero.
    pub fn apply_commands(&mut self) -> &EventBuffer {
        self.events.clear();
        self.drain_commands();
        &self.events
    }

    fn drain_commands(&mut self) {
        while let Some(command) = self.commands.try_pop() {
            match command {
                TrackCommand::Add(part) => self.parts.push(part),
                TrackCommand::Remove(id) => self.parts.retain(|p| p.id() != id),
                TrackCommand::Clear => self.parts.clear(),
                TrackCommand::StopAllNotes => self.active.release_all(&mut self.events),
                TrackCommand::SetTempo(tempo) => self.tempo = tempo,
            }
        }
    }
}
