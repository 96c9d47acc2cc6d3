//! Pitch resolution.
//!
//! A pitch is either a raw MIDI number or a string of the form
//! `SCALE_OCTAVE_DEGREE` (root C) or `ROOT_SCALE_OCTAVE_DEGREE`, e.g.
//! `"D_PENTAMAJ_3_1"`. Degrees are 1-based; a degree of 0 or past the end of
//! the scale leaves the pitch on the root of the octave.

use crate::error::GenError;

use super::Value;

const DELIMITER: char = '_';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    Major,
    Minor,
    PentatonicMajor,
    PentatonicMinor,
    HarmonicMinor,
    Dorian,
    Mixolydian,
    Blues,
    Chromatic,
}

/// Substituted when a pitch string names a scale we do not know.
pub const DEFAULT_SCALE: Scale = Scale::Major;

impl Scale {
    pub fn intervals(self) -> &'static [i32] {
        match self {
            Scale::Major => &[0, 2, 4, 5, 7, 9, 11],
            Scale::Minor => &[0, 2, 3, 5, 7, 8, 10],
            Scale::PentatonicMajor => &[0, 2, 4, 7, 9],
            Scale::PentatonicMinor => &[0, 3, 5, 7, 10],
            Scale::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            Scale::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            Scale::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            Scale::Blues => &[0, 3, 5, 6, 7, 10],
            Scale::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Scale::Major => "MAJ",
            Scale::Minor => "MIN",
            Scale::PentatonicMajor => "PENTAMAJ",
            Scale::PentatonicMinor => "PENTAMIN",
            Scale::HarmonicMinor => "HARMMIN",
            Scale::Dorian => "DORIAN",
            Scale::Mixolydian => "MIXOLYDIAN",
            Scale::Blues => "BLUES",
            Scale::Chromatic => "CHROMATIC",
        }
    }

    /// Case-insensitive lookup. `CMAJ` and `CMIN` are accepted as aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        let scale = match name.to_ascii_uppercase().as_str() {
            "MAJ" | "MAJOR" | "CMAJ" => Scale::Major,
            "MIN" | "MINOR" | "CMIN" => Scale::Minor,
            "PENTAMAJ" => Scale::PentatonicMajor,
            "PENTAMIN" => Scale::PentatonicMinor,
            "HARMMIN" => Scale::HarmonicMinor,
            "DORIAN" => Scale::Dorian,
            "MIXOLYDIAN" => Scale::Mixolydian,
            "BLUES" => Scale::Blues,
            "CHROMATIC" => Scale::Chromatic,
            _ => return None,
        };
        Some(scale)
    }
}

/// Pitch class of a root name such as `C`, `F#` or `Bb`.
pub fn pitch_class(name: &str) -> Option<i32> {
    let mut chars = name.chars();
    let base: i32 = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let accidental = match chars.as_str() {
        "" => 0,
        "#" => 1,
        "b" => -1,
        _ => return None,
    };
    Some((base + accidental).rem_euclid(12))
}

pub fn midi_pitch(root: i32, scale: Scale, octave: i32, degree: i32) -> i32 {
    let mut pitch = 12 * octave + root;
    let intervals = scale.intervals();
    if degree >= 1 && degree as usize <= intervals.len() {
        pitch += intervals[degree as usize - 1];
    }
    pitch
}

#[derive(Debug, Clone, PartialEq)]
pub struct PitchSpec {
    pub root: i32,
    pub scale: Scale,
    pub octave: i32,
    pub degree: i32,
    /// Set when the named scale was unknown and [`DEFAULT_SCALE`] was used.
    pub unknown_scale: Option<String>,
}

impl PitchSpec {
    pub fn parse(s: &str) -> Result<Self, GenError> {
        let fields: Vec<&str> = s.split(DELIMITER).collect();
        let (root, scale, octave, degree) = match fields.as_slice() {
            [scale, octave, degree] => (0, *scale, *octave, *degree),
            [root, scale, octave, degree] => {
                let root = pitch_class(root)
                    .ok_or(GenError::malformed("root pitch class", "unknown name"))?;
                (root, *scale, *octave, *degree)
            }
            _ => return Err(GenError::malformed("pitch string", "wrong field count")),
        };

        let (scale, unknown_scale) = match Scale::from_name(scale) {
            Some(scale) => (scale, None),
            None => (DEFAULT_SCALE, Some(scale.to_string())),
        };

        Ok(Self {
            root,
            scale,
            octave: parse_digit(octave, "octave digit")?,
            degree: parse_digit(degree, "degree digit")?,
            unknown_scale,
        })
    }

    pub fn midi(&self) -> i32 {
        midi_pitch(self.root, self.scale, self.octave, self.degree)
    }
}

fn parse_digit(s: &str, expected: &'static str) -> Result<i32, GenError> {
    let mut chars = s.chars();
    match (chars.next().and_then(|c| c.to_digit(10)), chars.next()) {
        (Some(d), None) => Ok(d as i32),
        _ => Err(GenError::malformed(expected, "text")),
    }
}

/// Resolves a pitch child's output into a MIDI note number.
pub fn resolve_pitch(value: &Value) -> Result<u8, GenError> {
    let pitch = match value {
        Value::Integer(i) => (*i).clamp(i32::MIN as i64, i32::MAX as i64) as i32,
        Value::Text(s) => {
            let spec = PitchSpec::parse(s)?;
            // Runs on the audio side; song compilation warns about these up front.
            if let Some(name) = &spec.unknown_scale {
                tracing::debug!(
                    error = %GenError::UnknownScale(name.clone()),
                    pitch = %s,
                    "substituting {}",
                    DEFAULT_SCALE.name()
                );
            }
            spec.midi()
        }
        other => return Err(GenError::malformed("pitch", other.kind())),
    };
    to_midi(pitch)
}

pub fn to_midi(pitch: i32) -> Result<u8, GenError> {
    u8::try_from(pitch)
        .ok()
        .filter(|p| *p <= 127)
        .ok_or(GenError::PitchOutOfRange(pitch))
}
