use alloc_runtime::BoundExpression;

use crate::allocation_config::Capacity;
use crate::zone_table::{TableError, ZoneTable};

/// Units placed by one draw: `ceil(raw)` clamped to `[0, remaining]`, with
/// non-finite or non-positive values resolving to 0.
pub fn clamp_amount(raw: f64, remaining: u64) -> u64 {
    let rounded = raw.ceil();
    if !rounded.is_finite() || rounded <= 0.0 {
        0
    } else if rounded >= remaining as f64 {
        remaining
    } else {
        rounded as u64
    }
}

#[derive(Debug, Clone)]
pub enum CapacityResolver {
    Single,
    Expression(BoundExpression),
}

impl CapacityResolver {
    pub fn bind(capacity: &Capacity, table: &ZoneTable) -> Result<Self, TableError> {
        Ok(match capacity {
            Capacity::Single => CapacityResolver::Single,
            Capacity::Expression(expression) => {
                CapacityResolver::Expression(table.bind(expression)?)
            }
        })
    }

    pub fn resolve_amount(&self, table: &ZoneTable, row: usize, remaining: u64) -> u64 {
        match self {
            CapacityResolver::Single => remaining.min(1),
            CapacityResolver::Expression(expression) => {
                clamp_amount(expression.eval(&table.row(row)), remaining)
            }
        }
    }
}
