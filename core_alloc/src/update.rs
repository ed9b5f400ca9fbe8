//! Post-allocation column updates.

use alloc_runtime::Assignment;

use crate::allocation_config::{AllocationConfig, ConfigError};
use crate::zone_table::{TableError, ZoneTable};

/// Ordered `target = expression` assignments. Each line sees the columns
/// written by the lines before it.
#[derive(Debug, Clone, Default)]
pub struct UpdateBlock {
    assignments: Vec<Assignment>,
}

impl UpdateBlock {
    pub fn new(assignments: Vec<Assignment>) -> Self {
        Self { assignments }
    }

    pub fn from_config(config: &AllocationConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.update_assignments()?))
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Evaluates each assignment over every row and stores the result as a
    /// numeric column. Stops at the first failing line; earlier lines stay
    /// applied.
    pub fn apply(&self, table: &mut ZoneTable) -> Result<(), TableError> {
        for assignment in &self.assignments {
            let bound = table.bind(&assignment.expression)?;
            let values = table.evaluate(&bound);
            table.set_numeric_column(&assignment.target, values)?;
            tracing::debug!(
                target: "landuse_alloc::update",
                column = %assignment.target,
                expression = %assignment.expression,
                "update.column_written"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone_table::Column;
    use alloc_runtime::parse_assignment;

    fn table() -> ZoneTable {
        ZoneTable::new(
            "id",
            vec![
                Column::text("id", ["a", "b", "c"]),
                Column::numeric("du", vec![10.0, 0.0, 4.0]),
                Column::numeric("du_new", vec![2.0, 1.0, 0.0]),
            ],
        )
        .unwrap()
    }

    fn block(lines: &[&str]) -> UpdateBlock {
        UpdateBlock::new(lines.iter().map(|line| parse_assignment(line).unwrap()).collect())
    }

    #[test]
    fn lines_apply_in_order() {
        let mut table = table();
        block(&["du_total = du + du_new", "grew = du_total > du", "du = du_total * 2"])
            .apply(&mut table)
            .unwrap();
        assert_eq!(table.numeric("du_total").unwrap(), &[12.0, 1.0, 4.0]);
        assert_eq!(table.numeric("grew").unwrap(), &[1.0, 1.0, 0.0]);
        assert_eq!(table.numeric("du").unwrap(), &[24.0, 2.0, 8.0]);
    }

    #[test]
    fn id_column_cannot_be_assigned() {
        let mut table = table();
        let err = block(&["id = du"]).apply(&mut table).unwrap_err();
        assert!(matches!(err, TableError::ImmutableIdColumn(_)));
    }

    #[test]
    fn unknown_column_stops_the_block() {
        let mut table = table();
        let err = block(&["x = du", "y = missing + 1", "z = 3"])
            .apply(&mut table)
            .unwrap_err();
        assert!(matches!(err, TableError::UnknownColumn(_)));
        assert!(table.has_column("x"));
        assert!(!table.has_column("z"));
    }
}
