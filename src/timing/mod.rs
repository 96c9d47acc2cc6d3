mod scheduler;
mod tempo;

pub use scheduler::{ActiveNotes, Part, PartId, Quantization, Window};
pub use tempo::{Tempo, block_ms, ms_to_samples};
