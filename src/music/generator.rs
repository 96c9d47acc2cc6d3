//! Generator trees.
//!
//! A [`Generator`] tree is immutable once built and shared between parts
//! through [`GenRef`]. Everything that moves during playback lives in a
//! [`Cursor`], which mirrors the shape of the tree and is owned by exactly
//! one part.
//!
//! Pulling is split in two: [`Generator::step`] advances a cursor and
//! [`Generator::produce`] yields the value at the current position.
//! [`Generator::generate`] only steps when the previous pull reported that
//! the current child was ready to be stepped past, so a pattern holds its
//! position while a nested pattern plays all of its own values.

use std::sync::Arc;

use rand::Rng;

use super::pitch::{resolve_pitch, to_midi};
use super::weighted::weighted_index;
use super::{Note, Rest, Value};
use crate::error::GenError;

pub type GenRef = Arc<Generator>;

#[derive(Debug)]
pub enum Generator {
    Single(Value),
    Note {
        pitch: GenRef,
        velocity: GenRef,
        length: GenRef,
    },
    Rest {
        length: GenRef,
    },
    /// Plays `children` in order, `repeat` times (`None` loops forever).
    Pattern {
        children: Vec<GenRef>,
        repeat: Option<u32>,
    },
    Weighted {
        choices: Vec<(GenRef, u32)>,
    },
    Transpose {
        inner: GenRef,
        amount: i32,
    },
}

/// Result of one pull.
#[derive(Debug, Clone, PartialEq)]
pub struct Pull {
    pub value: Result<Value, GenError>,
    /// The node has finished everything it owes for its current step and a
    /// parent may move past it. Leaves are ready after every pull; patterns
    /// only once their repeat budget is exhausted.
    pub can_step: bool,
    /// The repeat budget is exhausted. Stays set until the cursor is reset.
    pub done: bool,
}

impl Pull {
    fn leaf(value: Result<Value, GenError>) -> Self {
        Pull {
            value,
            can_step: true,
            done: false,
        }
    }

    fn finished(error: GenError) -> Self {
        Pull {
            value: Err(error),
            can_step: true,
            done: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cursor {
    Leaf,
    Note {
        pitch: Box<Cursor>,
        velocity: Box<Cursor>,
        length: Box<Cursor>,
    },
    Rest {
        length: Box<Cursor>,
    },
    Pattern {
        position: usize,
        /// Completed passes over the children.
        repeats: u32,
        /// Carried from the last pull: the current child is ready.
        pending_step: bool,
        done: bool,
        children: Vec<Cursor>,
    },
    Weighted {
        /// Child still playing out a multi-pull step.
        active: Option<usize>,
        children: Vec<Cursor>,
    },
    Transpose {
        inner: Box<Cursor>,
    },
}

impl Cursor {
    pub fn reset(&mut self) {
        match self {
            Cursor::Leaf => {}
            Cursor::Note {
                pitch,
                velocity,
                length,
            } => {
                pitch.reset();
                velocity.reset();
                length.reset();
            }
            Cursor::Rest { length } => length.reset(),
            Cursor::Pattern {
                position,
                repeats,
                pending_step,
                done,
                children,
            } => {
                *position = 0;
                *repeats = 0;
                *pending_step = false;
                *done = false;
                children.iter_mut().for_each(Cursor::reset);
            }
            Cursor::Weighted { active, children } => {
                *active = None;
                children.iter_mut().for_each(Cursor::reset);
            }
            Cursor::Transpose { inner } => inner.reset(),
        }
    }
}

impl Generator {
    /// Fresh playback state for this tree.
    pub fn cursor(&self) -> Cursor {
        match self {
            Generator::Single(_) => Cursor::Leaf,
            Generator::Note {
                pitch,
                velocity,
                length,
            } => Cursor::Note {
                pitch: Box::new(pitch.cursor()),
                velocity: Box::new(velocity.cursor()),
                length: Box::new(length.cursor()),
            },
            Generator::Rest { length } => Cursor::Rest {
                length: Box::new(length.cursor()),
            },
            Generator::Pattern { children, .. } => Cursor::Pattern {
                position: 0,
                repeats: 0,
                pending_step: false,
                done: false,
                children: children.iter().map(|c| c.cursor()).collect(),
            },
            Generator::Weighted { choices } => Cursor::Weighted {
                active: None,
                children: choices.iter().map(|(c, _)| c.cursor()).collect(),
            },
            Generator::Transpose { inner, .. } => Cursor::Transpose {
                inner: Box::new(inner.cursor()),
            },
        }
    }

    /// One logical pull: steps if the last pull allowed it, then produces.
    pub fn generate<R: Rng>(&self, cursor: &mut Cursor, rng: &mut R) -> Pull {
        if !self.fits(cursor) {
            *cursor = self.cursor();
        }
        if matches!(
            *cursor,
            Cursor::Pattern {
                pending_step: true,
                done: false,
                ..
            }
        ) {
            self.step(cursor);
        }
        self.produce(cursor, rng)
    }

    /// Advances a pattern to its next child, wrapping into the next repeat
    /// after the last one. The child being left is reset so it starts over
    /// the next time it is reached. No-op for every other node.
    pub fn step(&self, cursor: &mut Cursor) {
        let (Generator::Pattern { children, .. }, Cursor::Pattern {
            position,
            repeats,
            pending_step,
            children: child_cursors,
            ..
        }) = (self, cursor)
        else {
            return;
        };
        if children.is_empty() {
            return;
        }

        if let Some(left) = child_cursors.get_mut(*position) {
            left.reset();
        }
        *position += 1;
        if *position >= children.len() {
            *position = 0;
            *repeats += 1;
        }
        *pending_step = false;
    }

    /// Value at the cursor's current position.
    pub fn produce<R: Rng>(&self, cursor: &mut Cursor, rng: &mut R) -> Pull {
        match (self, cursor) {
            (Generator::Single(value), _) => Pull::leaf(Ok(value.clone())),

            (
                Generator::Note {
                    pitch,
                    velocity,
                    length,
                },
                Cursor::Note {
                    pitch: pitch_cursor,
                    velocity: velocity_cursor,
                    length: length_cursor,
                },
            ) => {
                let pitch = pull_attribute(pitch, pitch_cursor, rng);
                let velocity = pull_attribute(velocity, velocity_cursor, rng);
                let length = pull_attribute(length, length_cursor, rng);
                Pull::leaf(make_note(pitch, velocity, length))
            }

            (Generator::Rest { length }, Cursor::Rest { length: cursor }) => {
                let length = pull_attribute(length, cursor, rng);
                Pull::leaf(length.and_then(|l| Ok(Value::Rest(Rest { length: l.as_length()? }))))
            }

            (
                Generator::Pattern { children, repeat },
                Cursor::Pattern {
                    position,
                    repeats,
                    pending_step,
                    done,
                    children: child_cursors,
                },
            ) => {
                if children.is_empty() {
                    *done = true;
                    return Pull::finished(GenError::EmptyPattern);
                }
                if *done || repeat.is_some_and(|r| *repeats >= r) {
                    *done = true;
                    return Pull::finished(GenError::Exhausted);
                }

                let child = children[*position].generate(&mut child_cursors[*position], rng);
                *pending_step = child.can_step;
                let last_repeat = repeat.is_some_and(|r| *repeats + 1 >= r);
                if child.can_step && *position + 1 == children.len() && last_repeat {
                    *done = true;
                }
                Pull {
                    value: child.value,
                    can_step: *done,
                    done: *done,
                }
            }

            (Generator::Weighted { choices }, Cursor::Weighted { active, children }) => {
                let index = match *active {
                    Some(i) => i,
                    None => match weighted_index(choices.iter().map(|(_, w)| *w), rng) {
                        Ok(i) => i,
                        Err(e) => return Pull::leaf(Err(e)),
                    },
                };

                let pull = choices[index].0.generate(&mut children[index], rng);
                if pull.can_step {
                    *active = None;
                    if pull.done {
                        children[index].reset();
                    }
                } else {
                    *active = Some(index);
                }
                Pull {
                    value: pull.value,
                    can_step: pull.can_step,
                    done: false,
                }
            }

            (Generator::Transpose { inner, amount }, Cursor::Transpose { inner: cursor }) => {
                let pull = inner.generate(cursor, rng);
                let value = pull.value.and_then(|value| match value {
                    Value::Note(note) => Ok(Value::Note(Note {
                        pitch: to_midi(i32::from(note.pitch) + *amount)?,
                        ..note
                    })),
                    other => Ok(other),
                });
                Pull { value, ..pull }
            }

            // `generate` rebuilds mismatched cursors, so this is only reachable
            // through a direct `produce` with a foreign cursor.
            (_, cursor) => {
                *cursor = self.cursor();
                self.produce(cursor, rng)
            }
        }
    }

    fn fits(&self, cursor: &Cursor) -> bool {
        match (self, cursor) {
            (Generator::Single(_), Cursor::Leaf) => true,
            (Generator::Note { .. }, Cursor::Note { .. }) => true,
            (Generator::Rest { .. }, Cursor::Rest { .. }) => true,
            (Generator::Pattern { children, .. }, Cursor::Pattern { children: c, .. }) => {
                children.len() == c.len()
            }
            (Generator::Weighted { choices }, Cursor::Weighted { children, .. }) => {
                choices.len() == children.len()
            }
            (Generator::Transpose { .. }, Cursor::Transpose { .. }) => true,
            _ => false,
        }
    }
}

/// Pulls one note attribute; attribute patterns start over once exhausted.
fn pull_attribute<R: Rng>(
    generator: &Generator,
    cursor: &mut Cursor,
    rng: &mut R,
) -> Result<Value, GenError> {
    let pull = generator.generate(cursor, rng);
    if pull.done {
        cursor.reset();
    }
    pull.value
}

fn make_note(
    pitch: Result<Value, GenError>,
    velocity: Result<Value, GenError>,
    length: Result<Value, GenError>,
) -> Result<Value, GenError> {
    Ok(Value::Note(Note {
        pitch: resolve_pitch(&pitch?)?,
        velocity: velocity?.as_velocity()?,
        length: length?.as_length()?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::music::builder::{note, pattern, rest, single, transpose, weighted};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn pull_all(generator: &Generator, count: usize) -> Vec<Pull> {
        let mut rng = StdRng::seed_from_u64(3);
        let mut cursor = generator.cursor();
        (0..count).map(|_| generator.generate(&mut cursor, &mut rng)).collect()
    }

    fn ints(pulls: &[Pull]) -> Vec<i64> {
        pulls
            .iter()
            .map(|p| match p.value {
                Ok(Value::Integer(i)) => i,
                ref other => panic!("expected integer, got {other:?}"),
            })
            .collect()
    }

    #[test]
    fn single_value_repeats_forever() {
        let pulls = pull_all(&single(5i64), 4);
        assert_eq!(ints(&pulls), vec![5, 5, 5, 5]);
        assert!(pulls.iter().all(|p| p.can_step && !p.done));
    }

    #[test]
    fn pattern_plays_children_in_order_for_each_repeat() {
        let p = pattern(vec![single(1i64), single(2i64), single(3i64)], Some(2));
        let pulls = pull_all(&p, 6);
        assert_eq!(ints(&pulls), vec![1, 2, 3, 1, 2, 3]);
        assert!(pulls[..5].iter().all(|p| !p.done));
        assert!(pulls[5].done && pulls[5].can_step);
    }

    #[test]
    fn done_pattern_stays_done_until_reset() {
        let p = pattern(vec![single(1i64)], Some(1));
        let mut rng = StdRng::seed_from_u64(0);
        let mut cursor = p.cursor();
        assert!(p.generate(&mut cursor, &mut rng).done);
        let again = p.generate(&mut cursor, &mut rng);
        assert!(again.done);
        assert_eq!(again.value, Err(GenError::Exhausted));

        cursor.reset();
        let fresh = p.generate(&mut cursor, &mut rng);
        assert_eq!(fresh.value, Ok(Value::Integer(1)));
    }

    #[test]
    fn endless_pattern_never_reports_done() {
        let p = pattern(vec![single(1i64), single(2i64)], None);
        let pulls = pull_all(&p, 9);
        assert_eq!(ints(&pulls), vec![1, 2, 1, 2, 1, 2, 1, 2, 1]);
        assert!(pulls.iter().all(|p| !p.done && !p.can_step));
    }

    #[test]
    fn nested_pattern_finishes_before_parent_advances() {
        let inner = pattern(vec![single(1i64), single(2i64)], Some(2));
        let outer = pattern(vec![inner, single(9i64)], Some(2));
        let pulls = pull_all(&outer, 10);
        assert_eq!(ints(&pulls), vec![1, 2, 1, 2, 9, 1, 2, 1, 2, 9]);
        assert!(pulls[..9].iter().all(|p| !p.done));
        assert!(pulls[9].done);
    }

    #[test]
    fn empty_pattern_is_immediately_done() {
        let pulls = pull_all(&pattern(vec![], Some(4)), 1);
        assert_eq!(pulls[0].value, Err(GenError::EmptyPattern));
        assert!(pulls[0].done);

        // A parent steps straight past it.
        let outer = pattern(vec![pattern(vec![], None), single(7i64)], Some(1));
        let pulls = pull_all(&outer, 2);
        assert_eq!(pulls[0].value, Err(GenError::EmptyPattern));
        assert_eq!(pulls[1].value, Ok(Value::Integer(7)));
        assert!(pulls[1].done);
    }

    #[test]
    fn note_combines_its_children() {
        let n = note("D_PENTAMAJ_3_2", 80i64, 0.5f32);
        let pulls = pull_all(&n, 1);
        assert_eq!(
            pulls[0].value,
            Ok(Value::Note(Note {
                pitch: 40,
                velocity: 80,
                length: 0.5
            }))
        );
    }

    #[test]
    fn note_attribute_patterns_cycle() {
        let pitches = pattern(vec![single(60i64), single(62i64)], Some(1));
        let n = note(pitches, 100i64, 1i64);
        let got: Vec<u8> = pull_all(&n, 5)
            .into_iter()
            .map(|p| match p.value {
                Ok(Value::Note(n)) => n.pitch,
                other => panic!("expected note, got {other:?}"),
            })
            .collect();
        assert_eq!(got, vec![60, 62, 60, 62, 60]);
    }

    #[test]
    fn malformed_pitch_yields_error_but_stays_steppable() {
        let n = note(Value::Real(1.5), 100i64, 1i64);
        let pulls = pull_all(&n, 1);
        assert!(matches!(pulls[0].value, Err(GenError::MalformedValue { .. })));
        assert!(pulls[0].can_step);
    }

    #[test]
    fn rest_wraps_length() {
        let pulls = pull_all(&rest(3i64), 1);
        assert_eq!(pulls[0].value, Ok(Value::Rest(Rest { length: 3.0 })));
    }

    #[test]
    fn weighted_only_picks_positive_weights() {
        let w = weighted(vec![(single(1i64), 0), (single(2i64), 3)]);
        assert!(ints(&pull_all(&w, 50)).iter().all(|v| *v == 2));
    }

    #[test]
    fn weighted_zero_total_is_invalid() {
        let w = weighted(vec![(single(1i64), 0)]);
        assert_eq!(pull_all(&w, 1)[0].value, Err(GenError::InvalidWeights));
    }

    #[test]
    fn weighted_holds_a_nested_pattern_until_it_finishes() {
        let a = pattern(vec![single(1i64), single(2i64), single(3i64)], Some(1));
        let b = pattern(vec![single(10i64), single(20i64), single(30i64)], Some(1));
        let w = weighted(vec![(a, 1), (b, 1)]);
        let values = ints(&pull_all(&w, 30));
        for chunk in values.chunks(3) {
            assert!(chunk == [1, 2, 3] || chunk == [10, 20, 30], "{chunk:?}");
        }
    }

    #[test]
    fn transpose_shifts_only_notes() {
        let t = transpose(pattern(vec![note(60i64, 90i64, 1i64), rest(1i64)], None), 7);
        let pulls = pull_all(&t, 2);
        assert!(matches!(pulls[0].value, Ok(Value::Note(Note { pitch: 67, .. }))));
        assert_eq!(pulls[1].value, Ok(Value::Rest(Rest { length: 1.0 })));
    }

    #[test]
    fn transpose_out_of_range_is_an_error() {
        let t = transpose(note(120i64, 90i64, 1i64), 12);
        assert_eq!(pull_all(&t, 1)[0].value, Err(GenError::PitchOutOfRange(132)));
    }

    #[test]
    fn shared_subtree_keeps_independent_cursors() {
        let shared = pattern(vec![single(1i64), single(2i64)], None);
        let mut rng = StdRng::seed_from_u64(0);
        let mut first = shared.cursor();
        let mut second = shared.cursor();
        shared.generate(&mut first, &mut rng);
        let a = shared.generate(&mut first, &mut rng);
        let b = shared.generate(&mut second, &mut rng);
        assert_eq!(a.value, Ok(Value::Integer(2)));
        assert_eq!(b.value, Ok(Value::Integer(1)));
    }
}
