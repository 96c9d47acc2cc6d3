use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::error::SongError;
use crate::music::pitch::DEFAULT_SCALE;
use crate::music::{GenRef, PitchSpec, Value, builder};
use crate::timing::{Quantization, Tempo};

/// Declarative form of a generator tree, as written in a song file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GeneratorSpec {
    Text(String),
    Int(i64),
    Real(f32),
    /// Pitch, velocity, length in beats.
    Note(Box<GeneratorSpec>, Box<GeneratorSpec>, Box<GeneratorSpec>),
    Rest(Box<GeneratorSpec>),
    Pattern {
        children: Vec<GeneratorSpec>,
        #[serde(default)]
        repeat: Option<u32>,
    },
    Weighted(Vec<(GeneratorSpec, u32)>),
    Transpose(Box<GeneratorSpec>, i32),
    Freeze(Box<GeneratorSpec>),
    /// A named entry of the song's `generators` table.
    Ref(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub generator: GeneratorSpec,
    #[serde(default)]
    pub quantize: Quantization,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSpec {
    pub name: String,
    #[serde(default)]
    pub instrument: Option<String>,
    #[serde(default)]
    pub program: Option<u8>,
    #[serde(default)]
    pub patterns: Vec<PatternSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub name: String,
    #[serde(default)]
    pub config: EngineConfig,
    #[serde(default)]
    pub generators: BTreeMap<String, GeneratorSpec>,
    pub tracks: Vec<TrackSpec>,
}

/// A song with every generator built and shared.
#[derive(Debug, Clone)]
pub struct CompiledSong {
    pub name: String,
    pub config: EngineConfig,
    pub tempo: Tempo,
    pub tracks: Vec<CompiledTrack>,
}

#[derive(Debug, Clone)]
pub struct CompiledTrack {
    pub name: String,
    pub instrument: String,
    pub program: Option<u8>,
    pub patterns: Vec<(GenRef, Quantization)>,
}

impl CompiledSong {
    pub fn track_names(&self) -> Vec<String> {
        self.tracks.iter().map(|t| t.name.clone()).collect()
    }
}

impl Song {
    pub fn load(path: &Path) -> Result<Self, SongError> {
        let text = fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    pub fn from_ron(text: &str) -> Result<Self, SongError> {
        Ok(ron::from_str(text)?)
    }

    /// Builds every generator tree. Named generators are built once and
    /// shared by every reference to them.
    pub fn compile(&self) -> Result<CompiledSong, SongError> {
        let tempo = Tempo::new(self.config.bpm)?;
        self.config.validate()?;
        // A reload queues a clear plus every pattern of a track at once.
        if let Some(track) = self
            .tracks
            .iter()
            .find(|t| t.patterns.len() >= self.config.command_capacity)
        {
            return Err(SongError::InvalidConfig(format!(
                "track '{}' has {} patterns, command_capacity is {}",
                track.name,
                track.patterns.len(),
                self.config.command_capacity
            )));
        }
        let mut compiler = Compiler {
            specs: &self.generators,
            built: HashMap::new(),
            visiting: Vec::new(),
            rng: StdRng::seed_from_u64(self.config.seed),
            freeze_limit: self.config.max_pulls_per_window,
        };

        // Unreferenced entries are still checked.
        for name in self.generators.keys() {
            compiler.resolve(name)?;
        }

        let tracks = self
            .tracks
            .iter()
            .map(|track| {
                let patterns = track
                    .patterns
                    .iter()
                    .map(|p| Ok((compiler.build(&p.generator)?, p.quantize)))
                    .collect::<Result<Vec<_>, SongError>>()?;
                Ok(CompiledTrack {
                    name: track.name.clone(),
                    instrument: track.instrument.clone().unwrap_or_else(|| track.name.clone()),
                    program: track.program,
                    patterns,
                })
            })
            .collect::<Result<Vec<_>, SongError>>()?;

        Ok(CompiledSong {
            name: self.name.clone(),
            config: self.config.clone(),
            tempo,
            tracks,
        })
    }
}

struct Compiler<'a> {
    specs: &'a BTreeMap<String, GeneratorSpec>,
    built: HashMap<String, GenRef>,
    visiting: Vec<String>,
    rng: StdRng,
    freeze_limit: usize,
}

impl Compiler<'_> {
    fn resolve(&mut self, name: &str) -> Result<GenRef, SongError> {
        if let Some(generator) = self.built.get(name) {
            return Ok(generator.clone());
        }
        if self.visiting.iter().any(|n| n == name) {
            return Err(SongError::CyclicReference(name.to_string()));
        }
        let specs = self.specs;
        let spec = specs
            .get(name)
            .ok_or_else(|| SongError::UnknownGenerator(name.to_string()))?;

        self.visiting.push(name.to_string());
        let generator = self.build(spec);
        self.visiting.pop();

        let generator = generator?;
        self.built.insert(name.to_string(), generator.clone());
        Ok(generator)
    }

    fn build(&mut self, spec: &GeneratorSpec) -> Result<GenRef, SongError> {
        let generator = match spec {
            GeneratorSpec::Text(s) => {
                if let Ok(PitchSpec {
                    unknown_scale: Some(scale),
                    ..
                }) = PitchSpec::parse(s)
                {
                    tracing::warn!(pitch = %s, %scale, "unknown scale, {} will be used", DEFAULT_SCALE.name());
                }
                builder::single(Value::Text(s.clone()))
            }
            GeneratorSpec::Int(i) => builder::single(*i),
            GeneratorSpec::Real(r) => builder::single(*r),
            GeneratorSpec::Note(pitch, velocity, length) => builder::note(
                self.build(pitch)?,
                self.build(velocity)?,
                self.build(length)?,
            ),
            GeneratorSpec::Rest(length) => builder::rest(self.build(length)?),
            GeneratorSpec::Pattern { children, repeat } => {
                let children = children
                    .iter()
                    .map(|c| self.build(c))
                    .collect::<Result<Vec<_>, _>>()?;
                builder::pattern(children, *repeat)
            }
            GeneratorSpec::Weighted(choices) => {
                let choices = choices
                    .iter()
                    .map(|(c, w)| Ok((self.build(c)?, *w)))
                    .collect::<Result<Vec<_>, SongError>>()?;
                builder::weighted(choices)
            }
            GeneratorSpec::Transpose(inner, amount) => {
                builder::transpose(self.build(inner)?, *amount)
            }
            GeneratorSpec::Freeze(inner) => {
                let inner = self.build(inner)?;
                builder::freeze(&inner, &mut self.rng, self.freeze_limit)?
            }
            GeneratorSpec::Ref(name) => self.resolve(name)?,
        };
        Ok(generator)
    }
}
