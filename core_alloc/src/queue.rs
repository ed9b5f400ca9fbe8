//! Pool of land uses that still have units to place.

use rand::{
    distributions::{Distribution, WeightedIndex},
    Rng,
};

use crate::allocation_config::SelectionPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub key: String,
    pub initial: u64,
    pub remaining: u64,
    pub retired: bool,
}

impl QueueEntry {
    pub fn placed(&self) -> u64 {
        self.initial - self.remaining
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Active(usize),
    Done,
}

/// Entries keep their index for the whole run; `active` lists the ones still
/// eligible, in index order.
#[derive(Debug, Clone)]
pub struct AllocationQueue {
    entries: Vec<QueueEntry>,
    active: Vec<usize>,
    policy: SelectionPolicy,
}

impl AllocationQueue {
    pub fn new<S: Into<String>>(
        totals: impl IntoIterator<Item = (S, u64)>,
        policy: SelectionPolicy,
    ) -> Self {
        let entries: Vec<QueueEntry> = totals
            .into_iter()
            .map(|(key, total)| QueueEntry {
                key: key.into(),
                initial: total,
                remaining: total,
                retired: false,
            })
            .collect();
        let active = entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.remaining > 0)
            .map(|(index, _)| index)
            .collect();
        Self {
            entries,
            active,
            policy,
        }
    }

    pub fn state(&self) -> QueueState {
        if self.active.is_empty() {
            QueueState::Done
        } else {
            QueueState::Active(self.active.len())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> &QueueEntry {
        &self.entries[index]
    }

    pub fn active(&self) -> &[usize] {
        &self.active
    }

    /// Sum of the initial totals.
    pub fn queue_len(&self) -> u64 {
        self.entries.iter().map(|entry| entry.initial).sum()
    }

    pub fn remaining(&self) -> u64 {
        self.active
            .iter()
            .map(|&index| self.entries[index].remaining)
            .sum()
    }

    /// Draws the next entry index, or `None` once the pool is empty.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        if self.active.is_empty() {
            return None;
        }
        let position = match self.policy {
            SelectionPolicy::Uniform => rng.gen_range(0..self.active.len()),
            SelectionPolicy::WeightedByRemaining => {
                let weights = self
                    .active
                    .iter()
                    .map(|&index| self.entries[index].remaining);
                match WeightedIndex::new(weights) {
                    Ok(distribution) => distribution.sample(rng),
                    Err(_) => rng.gen_range(0..self.active.len()),
                }
            }
        };
        Some(self.active[position])
    }

    /// Subtracts `amount` from the entry and drops it from the pool when it
    /// reaches zero. Returns true when the entry finished.
    pub fn record(&mut self, index: usize, amount: u64) -> bool {
        let entry = &mut self.entries[index];
        debug_assert!(amount <= entry.remaining, "allocated past the control total");
        entry.remaining = entry.remaining.saturating_sub(amount);
        if entry.remaining == 0 {
            self.active.retain(|&active| active != index);
            true
        } else {
            false
        }
    }

    /// Removes an unfinished entry from the pool, keeping its remainder.
    pub fn retire(&mut self, index: usize) {
        self.entries[index].retired = true;
        self.active.retain(|&active| active != index);
    }
}
