//! Candidate sampling and the final weighted draw.

use alloc_runtime::{BoundExpression, Expression};
use rand::{
    distributions::{Distribution, WeightedIndex},
    seq::index,
    Rng,
};
use thiserror::Error;

use crate::zone_table::{TableError, ZoneTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{available} eligible zones for {requested} draws")]
pub struct InsufficientCandidates {
    pub requested: usize,
    pub available: usize,
}

/// Eligibility for one land use: its own filter AND the shared developable
/// predicate.
#[derive(Debug, Clone)]
pub struct ChoiceSampler {
    filter: BoundExpression,
    developable: BoundExpression,
}

impl ChoiceSampler {
    pub fn bind(
        table: &ZoneTable,
        filter: &Expression,
        developable: &Expression,
    ) -> Result<Self, TableError> {
        Ok(Self {
            filter: table.bind(filter)?,
            developable: table.bind(developable)?,
        })
    }

    /// Rows satisfying both predicates against the table's current state.
    pub fn eligible(&self, table: &ZoneTable) -> Vec<usize> {
        (0..table.len())
            .filter(|&row| {
                let view = table.row(row);
                self.filter.is_true(&view) && self.developable.is_true(&view)
            })
            .collect()
    }

    pub fn sample_candidates<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        table: &ZoneTable,
        n: usize,
    ) -> Result<Vec<usize>, InsufficientCandidates> {
        sample_without_replacement(rng, &self.eligible(table), n)
    }
}

/// Draws `n` distinct entries of `pool`, uniformly.
pub fn sample_without_replacement<R: Rng + ?Sized>(
    rng: &mut R,
    pool: &[usize],
    n: usize,
) -> Result<Vec<usize>, InsufficientCandidates> {
    if pool.len() < n {
        return Err(InsufficientCandidates {
            requested: n,
            available: pool.len(),
        });
    }
    Ok(index::sample(rng, pool.len(), n)
        .into_iter()
        .map(|position| pool[position])
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Draw<T> {
    pub choice: T,
    /// Set when the weights were degenerate and the pick was uniform.
    pub uniform_fallback: bool,
}

/// Picks one id with probability proportional to its weight.
///
/// Negative and non-finite weights count as zero. When nothing positive is
/// left the pick is uniform over `ids`. Weights are rescaled by their maximum
/// before sampling so large finite weights cannot overflow the total. Returns
/// `None` only for an empty `ids`.
pub fn weighted_choice<R: Rng + ?Sized, T: Copy>(
    rng: &mut R,
    ids: &[T],
    weights: &[f64],
) -> Option<Draw<T>> {
    if ids.is_empty() {
        return None;
    }
    debug_assert_eq!(ids.len(), weights.len());

    let sanitized: Vec<f64> = (0..ids.len())
        .map(|i| match weights.get(i) {
            Some(&weight) if weight.is_finite() && weight > 0.0 => weight,
            _ => 0.0,
        })
        .collect();
    let max = sanitized.iter().copied().fold(0.0_f64, f64::max);

    if max > 0.0 {
        let scaled: Vec<f64> = sanitized.iter().map(|weight| weight / max).collect();
        if let Ok(distribution) = WeightedIndex::new(&scaled) {
            return Some(Draw {
                choice: ids[distribution.sample(rng)],
                uniform_fallback: false,
            });
        }
    }

    tracing::trace!(
        target: "landuse_alloc::sampler",
        candidates = ids.len(),
        "weights.degenerate=uniform_fallback"
    );
    Some(Draw {
        choice: ids[rng.gen_range(0..ids.len())],
        uniform_fallback: true,
    })
}
