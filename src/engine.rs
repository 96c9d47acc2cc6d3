use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use crate::audio::{Instrument, Track, TrackHandle};
use crate::error::{EngineError, SongError};
use crate::events::{Event, SampleEvents};
use crate::song::{CompiledSong, CompiledTrack, Song};
use crate::timing::{Tempo, block_ms, ms_to_samples};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub block_frames: usize,
    pub bpm: f32,
    pub seed: u64,
    /// Slots in each track's command ring.
    pub command_capacity: usize,
    /// Pulls a single part may make in one window before it is cut off.
    pub max_pulls_per_window: usize,
    /// Preallocated events per track and window.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_frames: 512,
            bpm: 120.0,
            seed: 0x5eed,
            command_capacity: 64,
            max_pulls_per_window: 1024,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), SongError> {
        let checks = [
            (self.sample_rate > 0, "sample_rate must be positive"),
            (self.block_frames > 0, "block_frames must be positive"),
            (self.command_capacity > 0, "command_capacity must be positive"),
            (self.max_pulls_per_window > 0, "max_pulls_per_window must be positive"),
        ];
        match checks.into_iter().find(|(ok, _)| !ok) {
            Some((_, reason)) => Err(SongError::InvalidConfig(reason.to_string())),
            None => Ok(()),
        }
    }

    pub fn tempo(&self) -> Tempo {
        Tempo::new(self.bpm).unwrap_or_default()
    }

    pub fn block_ms(&self) -> f32 {
        block_ms(self.block_frames, self.sample_rate)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_frames as f64 / self.sample_rate.max(1) as f64)
    }
}

struct Slot {
    track: Track,
    instrument: Box<dyn Instrument>,
    pending_program: Option<u8>,
}

/// Drives every track one audio block at a time and hands the resulting
/// events to each track's instrument with sample offsets.
pub struct Conductor {
    config: EngineConfig,
    slots: Vec<Slot>,
    samples: SampleEvents,
}

impl Conductor {
    pub fn new(config: EngineConfig) -> Self {
        let samples = SampleEvents::with_capacity(config.event_capacity);
        Self {
            config,
            slots: Vec::new(),
            samples,
        }
    }

    /// Builds a conductor with one track per song track, each already
    /// queued with the song's patterns.
    pub fn from_song<F>(song: &CompiledSong, mut instrument: F) -> Result<(Self, Vec<TrackHandle>), EngineError>
    where
        F: FnMut(&CompiledTrack) -> Box<dyn Instrument>,
    {
        let mut config = song.config.clone();
        config.bpm = song.tempo.bpm();
        let mut conductor = Self::new(config);
        let mut handles = Vec::with_capacity(song.tracks.len());
        for spec in &song.tracks {
            let mut handle = conductor.add_track(&spec.name, instrument(spec));
            queue_track(&mut conductor, &mut handle, spec)?;
            handles.push(handle);
        }
        Ok((conductor, handles))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn add_track(&mut self, name: &str, instrument: Box<dyn Instrument>) -> TrackHandle {
        let (track, handle) = Track::new(self.slots.len(), name, &self.config);
        self.slots.push(Slot {
            track,
            instrument,
            pending_program: None,
        });
        handle
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.slots.get(index).map(|s| &s.track)
    }

    /// Sends `program` to the track's instrument at the start of the next block.
    pub fn program_change(&mut self, index: usize, program: u8) -> Result<(), EngineError> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(EngineError::UnknownTrack(index))?;
        slot.pending_program = Some(program);
        Ok(())
    }

    pub fn set_tempo(&mut self, tempo: Tempo) {
        self.config.bpm = tempo.bpm();
        for slot in &mut self.slots {
            slot.track.set_tempo(tempo);
        }
    }

    pub fn process_block(&mut self, frames: usize) {
        let sample_rate = self.config.sample_rate;
        let window_ms = block_ms(frames, sample_rate);

        for slot in &mut self.slots {
            if let Some(program) = slot.pending_program.take() {
                slot.instrument.program_change(0, program);
            }

            let events = slot.track.update(window_ms);
            self.samples.fill_from(events, sample_rate);
            dispatch(slot, &self.samples, sample_rate);
        }
    }

    /// Applies every queued track command without advancing time, so the
    /// command rings are empty afterwards. Note offs from `StopAllNotes`
    /// reach the instruments at offset zero.
    pub fn apply_commands(&mut self) {
        let sample_rate = self.config.sample_rate;
        for slot in &mut self.slots {
            let events = slot.track.apply_commands();
            self.samples.fill_from(events, sample_rate);
            dispatch(slot, &self.samples, sample_rate);
        }
    }
}

fn dispatch(slot: &mut Slot, samples: &SampleEvents, sample_rate: u32) {
    let tempo = slot.track.tempo();
    for (event, offset) in samples.iter() {
        match *event {
            Event::NoteOn {
                pitch,
                velocity,
                length,
            } => {
                let length = ms_to_samples(tempo.beats_to_ms(length), sample_rate);
                slot.instrument.note_on(offset, pitch, velocity, length);
            }
            Event::NoteOff { pitch } => slot.instrument.note_off(offset, pitch),
        }
    }
}

fn queue_track(
    conductor: &mut Conductor,
    handle: &mut TrackHandle,
    spec: &CompiledTrack,
) -> Result<(), EngineError> {
    for (generator, quantize) in &spec.patterns {
        handle.add_pattern(generator.clone(), *quantize)?;
    }
    if let Some(program) = spec.program {
        conductor.program_change(handle.id(), program)?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub enum EngineCommand {
    LoadSong(PathBuf),
    ReloadSong(Song),
    Play,
    Stop,
    SetTempo(f32),
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum EngineUpdate {
    SongLoaded { name: String, tracks: Vec<String> },
    PlaybackState { playing: bool },
    Error { message: String },
}

pub struct EngineHandle {
    pub command_tx: Sender<EngineCommand>,
    pub update_rx: Receiver<EngineUpdate>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.command_tx
            .send(command)
            .map_err(|_| EngineError::Disconnected)
    }

    /// Stops the engine thread and waits for it to exit.
    pub fn shutdown(mut self) {
        let _ = self.command_tx.send(EngineCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

pub type InstrumentFactory = Box<dyn FnMut(&CompiledTrack) -> Box<dyn Instrument> + Send>;

/// Starts the engine thread. `instrument` builds the sink of every track
/// whenever a song is loaded.
pub fn spawn_engine(instrument: InstrumentFactory) -> EngineHandle {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::unbounded();

    let thread = std::thread::spawn(move || {
        engine_thread(command_rx, update_tx, instrument);
    });

    EngineHandle {
        command_tx,
        update_rx,
        thread: Some(thread),
    }
}

struct EngineState {
    song: Option<CompiledSong>,
    conductor: Option<Conductor>,
    handles: Vec<TrackHandle>,
    instrument: InstrumentFactory,
    playing: bool,
    /// Parts were cleared by a stop and must be queued again on play.
    stopped: bool,
}

impl EngineState {
    fn new(instrument: InstrumentFactory) -> Self {
        Self {
            song: None,
            conductor: None,
            handles: Vec::new(),
            instrument,
            playing: false,
            stopped: false,
        }
    }

    fn install(&mut self, song: CompiledSong) -> Result<(), EngineError> {
        self.silence()?;
        let (mut conductor, handles) = Conductor::from_song(&song, &mut self.instrument)?;
        conductor.apply_commands();
        tracing::info!(song = %song.name, tracks = song.tracks.len(), "song loaded");
        self.conductor = Some(conductor);
        self.handles = handles;
        self.song = Some(song);
        self.stopped = false;
        Ok(())
    }

    /// Drops every part of the current conductor and releases its notes.
    fn silence(&mut self) -> Result<(), EngineError> {
        let Some(conductor) = self.conductor.as_mut() else {
            return Ok(());
        };
        for handle in &mut self.handles {
            handle.clear()?;
            handle.stop_all_notes()?;
        }
        conductor.apply_commands();
        Ok(())
    }

    /// Swaps in a new song. When the track layout is unchanged only the
    /// parts are replaced, so sounding notes ring out.
    fn reload(&mut self, song: CompiledSong) -> Result<(), EngineError> {
        let same_tracks = self
            .song
            .as_ref()
            .is_some_and(|current| current.track_names() == song.track_names());
        let conductor = match self.conductor.as_mut() {
            Some(conductor) if same_tracks => conductor,
            _ => return self.install(song),
        };

        conductor.set_tempo(song.tempo);
        for (handle, spec) in self.handles.iter_mut().zip(&song.tracks) {
            handle.clear()?;
            if !self.stopped {
                queue_track(conductor, handle, spec)?;
            }
        }
        conductor.apply_commands();
        tracing::info!(song = %song.name, "song reloaded");
        self.song = Some(song);
        Ok(())
    }

    fn play(&mut self) -> Result<(), EngineError> {
        let (Some(conductor), Some(song)) = (self.conductor.as_mut(), self.song.as_ref()) else {
            return Ok(());
        };
        if self.stopped {
            for (handle, spec) in self.handles.iter_mut().zip(&song.tracks) {
                queue_track(conductor, handle, spec)?;
            }
            conductor.apply_commands();
            self.stopped = false;
        }
        self.playing = true;
        tracing::info!(song = %song.name, "playing");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.playing = false;
        if self.conductor.is_none() {
            return Ok(());
        }
        self.silence()?;
        self.stopped = true;
        tracing::info!("stopped");
        Ok(())
    }

    fn set_tempo(&mut self, bpm: f32) -> Result<(), EngineError> {
        let tempo = Tempo::new(bpm)?;
        if let Some(conductor) = self.conductor.as_mut() {
            conductor.set_tempo(tempo);
        }
        tracing::info!(bpm, "tempo changed");
        Ok(())
    }
}

fn engine_thread(
    command_rx: Receiver<EngineCommand>,
    update_tx: Sender<EngineUpdate>,
    instrument: InstrumentFactory,
) {
    let mut state = EngineState::new(instrument);
    let mut deadline = Instant::now();

    loop {
        let command = if state.playing {
            match command_rx.recv_deadline(deadline) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(conductor) = state.conductor.as_mut() {
                        let frames = conductor.config().block_frames;
                        conductor.process_block(frames);
                        deadline += conductor.config().block_duration();
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match command_rx.recv() {
                Ok(command) => command,
                Err(_) => break,
            }
        };

        let result = match command {
            EngineCommand::LoadSong(path) => load(&path).and_then(|song| {
                let name = song.name.clone();
                let tracks = song.track_names();
                state.playing = false;
                state.install(song)?;
                let _ = update_tx.send(EngineUpdate::SongLoaded { name, tracks });
                let _ = update_tx.send(EngineUpdate::PlaybackState { playing: false });
                Ok(())
            }),
            EngineCommand::ReloadSong(song) => song
                .compile()
                .map_err(EngineError::from)
                .and_then(|song| {
                    let name = song.name.clone();
                    let tracks = song.track_names();
                    state.reload(song)?;
                    let _ = update_tx.send(EngineUpdate::SongLoaded { name, tracks });
                    Ok(())
                }),
            EngineCommand::Play => {
                let was_playing = state.playing;
                state.play().map(|()| {
                    if state.playing && !was_playing {
                        deadline = Instant::now();
                    }
                    let _ = update_tx.send(EngineUpdate::PlaybackState {
                        playing: state.playing,
                    });
                })
            }
            EngineCommand::Stop => state.stop().map(|()| {
                let _ = update_tx.send(EngineUpdate::PlaybackState { playing: false });
            }),
            EngineCommand::SetTempo(bpm) => state.set_tempo(bpm),
            EngineCommand::Shutdown => break,
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "engine command failed");
            let _ = update_tx.send(EngineUpdate::Error {
                message: e.to_string(),
            });
        }
    }

    tracing::info!("engine thread exiting");
}

fn load(path: &Path) -> Result<CompiledSong, EngineError> {
    let song = Song::load(path).and_then(|song| song.compile())?;
    Ok(song)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{InstrumentCall, RecordingInstrument};
    use crate::music::builder::{note, pattern, rest};
    use crate::timing::Quantization;

    fn config() -> EngineConfig {
        EngineConfig {
            sample_rate: 1000,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn dispatches_events_with_sample_offsets() {
        let recorder = RecordingInstrument::new();
        let mut conductor = Conductor::new(config());
        let mut handle = conductor.add_track("lead", Box::new(recorder.clone()));
        handle
            .add_pattern(
                pattern(vec![rest(0.5f32), note(64i64, 90i64, 1i64)], Some(1)),
                Quantization::Bar,
            )
            .unwrap();

        conductor.process_block(1000);
        assert_eq!(
            recorder.take(),
            vec![
                InstrumentCall::NoteOn {
                    offset: 250,
                    pitch: 64,
                    velocity: 90,
                    length: 500,
                },
                InstrumentCall::NoteOff {
                    offset: 750,
                    pitch: 64,
                },
            ]
        );
    }

    #[test]
    fn retrigger_on_the_same_sample_is_separated() {
        let recorder = RecordingInstrument::new();
        let mut conductor = Conductor::new(config());
        let mut handle = conductor.add_track("keys", Box::new(recorder.clone()));
        handle
            .add_pattern(
                pattern(
                    vec![note(60i64, 100i64, 1i64), rest(1i64), note(60i64, 100i64, 1i64)],
                    Some(1),
                ),
                Quantization::Bar,
            )
            .unwrap();

        conductor.process_block(1000);
        let calls = recorder.take();
        assert_eq!(
            calls[1..],
            [
                InstrumentCall::NoteOff {
                    offset: 499,
                    pitch: 60,
                },
                InstrumentCall::NoteOn {
                    offset: 500,
                    pitch: 60,
                    velocity: 100,
                    length: 500,
                },
            ]
        );
    }

    #[test]
    fn program_change_comes_first_and_once() {
        let recorder = RecordingInstrument::new();
        let mut conductor = Conductor::new(config());
        let mut handle = conductor.add_track("bass", Box::new(recorder.clone()));
        handle
            .add_pattern(note(36i64, 100i64, 4i64), Quantization::Bar)
            .unwrap();
        conductor.program_change(0, 33).unwrap();
        assert!(matches!(
            conductor.program_change(4, 1),
            Err(EngineError::UnknownTrack(4))
        ));

        conductor.process_block(100);
        conductor.process_block(100);
        let calls = recorder.take();
        assert_eq!(
            calls[0],
            InstrumentCall::ProgramChange {
                offset: 0,
                program: 33
            }
        );
        assert_eq!(
            calls
                .iter()
                .filter(|c| matches!(c, InstrumentCall::ProgramChange { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn tempo_scales_note_lengths() {
        let recorder = RecordingInstrument::new();
        let mut conductor = Conductor::new(config());
        let mut handle = conductor.add_track("lead", Box::new(recorder.clone()));
        conductor.set_tempo(Tempo::new(60.0).unwrap());
        handle
            .add_pattern(note(60i64, 100i64, 2i64), Quantization::Bar)
            .unwrap();

        conductor.process_block(500);
        assert_eq!(
            recorder.take(),
            vec![InstrumentCall::NoteOn {
                offset: 0,
                pitch: 60,
                velocity: 100,
                length: 2000,
            }]
        );
    }

    fn recording_state() -> (EngineState, RecordingInstrument) {
        let recorder = RecordingInstrument::new();
        let sink = recorder.clone();
        let factory: InstrumentFactory =
            Box::new(move |_: &CompiledTrack| -> Box<dyn Instrument> { Box::new(sink.clone()) });
        (EngineState::new(factory), recorder)
    }

    fn compiled(text: &str) -> CompiledSong {
        Song::from_ron(text).unwrap().compile().unwrap()
    }

    #[test]
    fn paused_reloads_keep_the_command_queue_empty() {
        let text = r#"Song(
            name: "idle",
            config: (command_capacity: 4),
            tracks: [(name: "lead", patterns: [
                (generator: Note(Int(60), Int(100), Int(1))),
                (generator: Rest(Int(1))),
            ])],
        )"#;
        let (mut state, _recorder) = recording_state();
        state.install(compiled(text)).unwrap();
        for _ in 0..12 {
            state.reload(compiled(text)).unwrap();
        }
        let parts = state.conductor.as_ref().unwrap().track(0).unwrap().parts().len();
        assert_eq!(parts, 2);

        for _ in 0..6 {
            state.stop().unwrap();
            state.reload(compiled(text)).unwrap();
        }
        let parts = state.conductor.as_ref().unwrap().track(0).unwrap().parts().len();
        assert_eq!(parts, 0);

        state.play().unwrap();
        let parts = state.conductor.as_ref().unwrap().track(0).unwrap().parts().len();
        assert_eq!(parts, 2);
    }

    #[test]
    fn replacing_the_track_layout_releases_sounding_notes() {
        let (mut state, recorder) = recording_state();
        state
            .install(compiled(
                r#"Song(name: "a", tracks: [(name: "pad", patterns: [(generator: Note(Int(57), Int(100), Int(16)))])])"#,
            ))
            .unwrap();
        state.conductor.as_mut().unwrap().process_block(512);
        assert!(recorder
            .take()
            .iter()
            .any(|c| matches!(c, InstrumentCall::NoteOn { pitch: 57, .. })));

        state
            .reload(compiled(r#"Song(name: "b", tracks: [(name: "lead", patterns: [])])"#))
            .unwrap();
        assert_eq!(
            recorder.take(),
            vec![InstrumentCall::NoteOff {
                offset: 0,
                pitch: 57
            }]
        );
    }

    #[test]
    fn zero_sized_settings_are_rejected() {
        assert!(EngineConfig::default().validate().is_ok());
        for config in [
            EngineConfig { sample_rate: 0, ..EngineConfig::default() },
            EngineConfig { block_frames: 0, ..EngineConfig::default() },
            EngineConfig { command_capacity: 0, ..EngineConfig::default() },
            EngineConfig { max_pulls_per_window: 0, ..EngineConfig::default() },
        ] {
            assert!(matches!(config.validate(), Err(SongError::InvalidConfig(_))));
        }
    }

    #[test]
    fn engine_thread_plays_and_stops() {
        let song = Song::from_ron(
            r#"Song(
                name: "pulse",
                config: (block_frames: 256),
                tracks: [(
                    name: "click",
                    program: Some(5),
                    patterns: [(generator: Pattern(children: [
                        Note(Int(72), Int(100), Real(0.05)),
                        Rest(Real(0.05)),
                    ]))],
                )],
            )"#,
        )
        .unwrap();

        let recorder = RecordingInstrument::new();
        let sink = recorder.clone();
        let factory: InstrumentFactory =
            Box::new(move |_: &CompiledTrack| -> Box<dyn Instrument> { Box::new(sink.clone()) });
        let engine = spawn_engine(factory);

        engine.send(EngineCommand::ReloadSong(song)).unwrap();
        assert!(matches!(
            engine.update_rx.recv().unwrap(),
            EngineUpdate::SongLoaded { ref tracks, .. } if tracks == &["click"]
        ));

        engine.send(EngineCommand::Play).unwrap();
        assert!(matches!(
            engine.update_rx.recv().unwrap(),
            EngineUpdate::PlaybackState { playing: true }
        ));
        std::thread::sleep(Duration::from_millis(200));

        engine.send(EngineCommand::Stop).unwrap();
        assert!(matches!(
            engine.update_rx.recv().unwrap(),
            EngineUpdate::PlaybackState { playing: false }
        ));

        engine.send(EngineCommand::SetTempo(-1.0)).unwrap();
        assert!(matches!(
            engine.update_rx.recv().unwrap(),
            EngineUpdate::Error { .. }
        ));
        engine.shutdown();

        let calls = recorder.take();
        assert_eq!(
            calls[0],
            InstrumentCall::ProgramChange {
                offset: 0,
                program: 5
            }
        );
        assert!(calls.iter().any(|c| matches!(c, InstrumentCall::NoteOn { pitch: 72, .. })));
        assert!(matches!(calls.last(), Some(InstrumentCall::NoteOff { pitch: 72, .. })));
    }
}
