use serde::{Deserialize, Serialize};

use crate::error::GenError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    pub velocity: u8,
    /// Beats
    pub length: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rest {
    /// Beats
    pub length: f32,
}

/// The unit exchanged between generators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Integer(i64),
    Real(f32),
    Note(Note),
    Rest(Rest),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Note(_) => "note",
            Value::Rest(_) => "rest",
        }
    }

    /// Numeric view used for velocities and lengths.
    pub fn as_number(&self, expected: &'static str) -> Result<f32, GenError> {
        match self {
            Value::Integer(i) => Ok(*i as f32),
            Value::Real(r) => Ok(*r),
            other => Err(GenError::malformed(expected, other.kind())),
        }
    }

    /// Non-negative beat length.
    pub fn as_length(&self) -> Result<f32, GenError> {
        let beats = self.as_number("length in beats")?;
        if beats.is_finite() && beats >= 0.0 {
            Ok(beats)
        } else {
            Err(GenError::malformed("length in beats", "negative or non-finite number"))
        }
    }

    pub fn as_velocity(&self) -> Result<u8, GenError> {
        let velocity = self.as_number("velocity")?;
        if !velocity.is_finite() {
            return Err(GenError::malformed("velocity", "non-finite number"));
        }
        Ok(velocity.round().clamp(0.0, 127.0) as u8)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f32> for Value {
    fn from(r: f32) -> Self {
        Value::Real(r)
    }
}

impl From<Note> for Value {
    fn from(n: Note) -> Self {
        Value::Note(n)
    }
}

impl From<Rest> for Value {
    fn from(r: Rest) -> Self {
        Value::Rest(r)
    }
}
