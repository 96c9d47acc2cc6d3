//! Construction helpers for generator trees.
//!
//! This is the surface a front end (song files, tests, an embedding host)
//! uses to assemble trees; every helper returns a shareable [`GenRef`].

use std::sync::Arc;

use rand::Rng;

use super::{GenRef, Generator, Value};
use crate::error::GenError;

pub trait IntoGenerator {
    fn into_generator(self) -> GenRef;
}

impl IntoGenerator for GenRef {
    fn into_generator(self) -> GenRef {
        self
    }
}

impl IntoGenerator for Generator {
    fn into_generator(self) -> GenRef {
        Arc::new(self)
    }
}

impl IntoGenerator for Value {
    fn into_generator(self) -> GenRef {
        Arc::new(Generator::Single(self))
    }
}

impl IntoGenerator for &str {
    fn into_generator(self) -> GenRef {
        Value::from(self).into_generator()
    }
}

impl IntoGenerator for String {
    fn into_generator(self) -> GenRef {
        Value::from(self).into_generator()
    }
}

impl IntoGenerator for i64 {
    fn into_generator(self) -> GenRef {
        Value::from(self).into_generator()
    }
}

impl IntoGenerator for f32 {
    fn into_generator(self) -> GenRef {
        Value::from(self).into_generator()
    }
}

pub fn single(value: impl Into<Value>) -> GenRef {
    Arc::new(Generator::Single(value.into()))
}

pub fn note(
    pitch: impl IntoGenerator,
    velocity: impl IntoGenerator,
    length: impl IntoGenerator,
) -> GenRef {
    Arc::new(Generator::Note {
        pitch: pitch.into_generator(),
        velocity: velocity.into_generator(),
        length: length.into_generator(),
    })
}

pub fn rest(length: impl IntoGenerator) -> GenRef {
    Arc::new(Generator::Rest {
        length: length.into_generator(),
    })
}

pub fn pattern(children: Vec<GenRef>, repeat: Option<u32>) -> GenRef {
    Arc::new(Generator::Pattern { children, repeat })
}

pub fn weighted(choices: Vec<(GenRef, u32)>) -> GenRef {
    Arc::new(Generator::Weighted { choices })
}

/// Weighted choice between plain values, e.g. a set of candidate pitches.
pub fn weighted_values<V: Into<Value>>(choices: impl IntoIterator<Item = (V, u32)>) -> GenRef {
    weighted(choices.into_iter().map(|(v, w)| (single(v), w)).collect())
}

pub fn transpose(inner: impl IntoGenerator, amount: i32) -> GenRef {
    Arc::new(Generator::Transpose {
        inner: inner.into_generator(),
        amount,
    })
}

/// Renders one full pass of `generator` into a pattern of fixed values.
///
/// Random choices are made once, here, so repeating the frozen pattern
/// replays them identically. Endless generators are cut off after
/// `max_values` pulls. Pulls that fail are skipped.
pub fn freeze<R: Rng>(
    generator: &Generator,
    rng: &mut R,
    max_values: usize,
) -> Result<GenRef, GenError> {
    let mut cursor = generator.cursor();
    let mut frozen = Vec::new();

    for _ in 0..max_values {
        let pull = generator.generate(&mut cursor, rng);
        match pull.value {
            Ok(value) => frozen.push(single(value)),
            Err(GenError::EmptyPattern | GenError::Exhausted) => {}
            Err(e) => tracing::warn!(error = %e, "skipping value while freezing"),
        }
        if pull.can_step || pull.done {
            break;
        }
    }

    if frozen.is_empty() {
        return Err(GenError::EmptyPattern);
    }
    Ok(pattern(frozen, Some(1)))
}
