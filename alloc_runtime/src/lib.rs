//! Expression runtime for the land-use allocation engine.
//!
//! Filter, capacity and update expressions arrive as configuration text. This
//! crate parses them into a small arithmetic/boolean AST, binds column names to
//! slots once, and evaluates the bound form against any [`RowValues`] source,
//! without depending on the zone table in `core_alloc`.

mod expression;
mod expression_text;

pub use expression::{
    is_truthy, Assignment, BinaryOp, BoundExpression, Expression, Function, Node, RowValues,
    UnaryOp,
};
pub use expression_text::{parse_assignment, parse_expression, ExprError};
