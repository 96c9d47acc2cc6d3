pub mod builder;
mod generator;
pub mod pitch;
mod value;
mod weighted;

pub use generator::{Cursor, GenRef, Generator, Pull};
pub use pitch::{PitchSpec, Scale};
pub use value::{Note, Rest, Value};
pub use weighted::{choose, weighted_index};
