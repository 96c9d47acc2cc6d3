use rand::Rng;

use crate::error::GenError;

/// Picks an index with probability `weight / total`.
///
/// Draws a uniform integer in `[0, total)` and returns the first index whose
/// cumulative weight exceeds it. Zero-weight entries are never chosen.
pub fn weighted_index<R, I>(weights: I, rng: &mut R) -> Result<usize, GenError>
where
    R: Rng,
    I: IntoIterator<Item = u32>,
    I::IntoIter: Clone,
{
    let weights = weights.into_iter();
    let total: u64 = weights.clone().map(u64::from).sum();
    if total == 0 {
        return Err(GenError::InvalidWeights);
    }

    let draw = rng.gen_range(0..total);
    let mut cumulative = 0u64;
    for (i, weight) in weights.enumerate() {
        cumulative += u64::from(weight);
        if cumulative > draw {
            return Ok(i);
        }
    }
    Err(GenError::InvalidWeights)
}

/// Weighted choice over a slice of `(item, weight)` pairs.
pub fn choose<'a, T, R>(items: &'a [(T, u32)], rng: &mut R) -> Result<&'a T, GenError>
where
    R: Rng,
{
    let i = weighted_index(items.iter().map(|(_, w)| *w), rng)?;
    Ok(&items[i].0)
}
