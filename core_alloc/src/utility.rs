use crate::allocation_config::Direction;
use crate::coefficients::Coefficients;
use crate::zone_table::ZoneTable;

/// Replaces NaN and infinities with zero.
pub fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Linear utility over a land use's coefficients, bound to table columns.
#[derive(Debug, Clone, PartialEq)]
pub struct UtilityModel {
    terms: Vec<(usize, f64)>,
    sign: f64,
}

impl UtilityModel {
    /// Coefficients naming columns the table does not have (or that hold
    /// text) contribute nothing.
    pub fn bind(coefficients: &Coefficients, table: &ZoneTable, direction: Direction) -> Self {
        let mut terms = Vec::with_capacity(coefficients.len());
        for (name, weight) in coefficients.terms() {
            match table.numeric_slot(name) {
                Ok(slot) => terms.push((slot, *weight)),
                Err(_) => tracing::debug!(
                    target: "landuse_alloc::utility",
                    attribute = %name,
                    "utility.term_ignored"
                ),
            }
        }
        Self {
            terms,
            sign: direction.utility_sign(),
        }
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn score_row(&self, table: &ZoneTable, row: usize) -> f64 {
        let utility: f64 = self
            .terms
            .iter()
            .map(|&(slot, weight)| weight * table.value_at(row, slot))
            .sum();
        self.sign * utility
    }

    pub fn score(&self, table: &ZoneTable, rows: &[usize]) -> Vec<f64> {
        rows.iter().map(|&row| self.score_row(table, row)).collect()
    }

    /// `exp(score)` per row with non-finite results zeroed. The vector may be
    /// all zeros when every score underflows or overflows.
    pub fn exp_weights(&self, table: &ZoneTable, rows: &[usize]) -> Vec<f64> {
        self.score(table, rows)
            .into_iter()
            .map(|score| sanitize(score.exp()))
            .collect()
    }
}
