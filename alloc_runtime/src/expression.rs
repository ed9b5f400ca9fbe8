use std::fmt;

use serde::Deserialize;

use crate::expression_text::{parse_expression, ExprError};

/// Column values for one row, addressed by the slots handed out at bind time.
pub trait RowValues {
    fn value(&self, slot: usize) -> f64;
}

impl RowValues for [f64] {
    fn value(&self, slot: usize) -> f64 {
        self.get(slot).copied().unwrap_or(f64::NAN)
    }
}

/// Non-zero and not NaN.
pub fn is_truthy(value: f64) -> bool {
    value != 0.0 && !value.is_nan()
}

fn from_bool(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Abs,
    Min,
    Max,
    Log,
    Exp,
    Sqrt,
    Floor,
    Ceil,
}

impl Function {
    pub fn name(self) -> &'static str {
        match self {
            Function::Abs => "abs",
            Function::Min => "min",
            Function::Max => "max",
            Function::Log => "log",
            Function::Exp => "exp",
            Function::Sqrt => "sqrt",
            Function::Floor => "floor",
            Function::Ceil => "ceil",
        }
    }

    fn apply(self, args: &[f64]) -> f64 {
        match self {
            Function::Abs => args[0].abs(),
            Function::Log => args[0].ln(),
            Function::Exp => args[0].exp(),
            Function::Sqrt => args[0].sqrt(),
            Function::Floor => args[0].floor(),
            Function::Ceil => args[0].ceil(),
            Function::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Function::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Parsed expression tree with column references still held by name.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Number(f64),
    Column(String),
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Call {
        function: Function,
        args: Vec<Node>,
    },
}

impl Node {
    pub(crate) fn binary(op: BinaryOp, lhs: Node, rhs: Node) -> Self {
        Node::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Node::Number(_) => {}
            Node::Column(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Node::Unary { operand, .. } => operand.collect_columns(out),
            Node::Binary { lhs, rhs, .. } => {
                lhs.collect_columns(out);
                rhs.collect_columns(out);
            }
            Node::Call { args, .. } => {
                for arg in args {
                    arg.collect_columns(out);
                }
            }
        }
    }

    fn bind<F>(&self, resolve: &F) -> Result<BoundNode, ExprError>
    where
        F: Fn(&str) -> Option<usize>,
    {
        Ok(match self {
            Node::Number(value) => BoundNode::Number(*value),
            Node::Column(name) => {
                BoundNode::Slot(resolve(name).ok_or_else(|| ExprError::UnknownColumn(name.clone()))?)
            }
            Node::Unary { op, operand } => BoundNode::Unary {
                op: *op,
                operand: Box::new(operand.bind(resolve)?),
            },
            Node::Binary { op, lhs, rhs } => BoundNode::Binary {
                op: *op,
                lhs: Box::new(lhs.bind(resolve)?),
                rhs: Box::new(rhs.bind(resolve)?),
            },
            Node::Call { function, args } => BoundNode::Call {
                function: *function,
                args: args
                    .iter()
                    .map(|arg| arg.bind(resolve))
                    .collect::<Result<_, _>>()?,
            },
        })
    }
}

/// An expression parsed from configuration text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    pub(crate) fn from_parts(source: String, root: Node) -> Self {
        Self { source, root }
    }

    pub fn parse(source: &str) -> Result<Self, ExprError> {
        parse_expression(source)
    }

    /// Expression that always evaluates to `value`.
    pub fn constant(value: f64) -> Self {
        Self {
            source: value.to_string(),
            root: Node::Number(value),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Returns the literal value when the whole expression is a single number.
    pub fn constant_value(&self) -> Option<f64> {
        match self.root {
            Node::Number(value) => Some(value),
            _ => None,
        }
    }

    /// Referenced column names, in first-use order.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.root.collect_columns(&mut out);
        out
    }

    /// Resolves every column reference to a slot; fails on the first name
    /// `resolve` does not know.
    pub fn bind<F>(&self, resolve: F) -> Result<BoundExpression, ExprError>
    where
        F: Fn(&str) -> Option<usize>,
    {
        Ok(BoundExpression {
            root: self.root.bind(&resolve)?,
        })
    }
}

impl TryFrom<String> for Expression {
    type Error = ExprError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_expression(&value)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum BoundNode {
    Number(f64),
    Slot(usize),
    Unary {
        op: UnaryOp,
        operand: Box<BoundNode>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<BoundNode>,
        rhs: Box<BoundNode>,
    },
    Call {
        function: Function,
        args: Vec<BoundNode>,
    },
}

impl BoundNode {
    fn eval<R: RowValues + ?Sized>(&self, row: &R) -> f64 {
        match self {
            BoundNode::Number(value) => *value,
            BoundNode::Slot(slot) => row.value(*slot),
            BoundNode::Unary { op, operand } => {
                let value = operand.eval(row);
                match op {
                    UnaryOp::Neg => -value,
                    UnaryOp::Not => from_bool(!is_truthy(value)),
                }
            }
            BoundNode::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => from_bool(is_truthy(lhs.eval(row)) && is_truthy(rhs.eval(row))),
                BinaryOp::Or => from_bool(is_truthy(lhs.eval(row)) || is_truthy(rhs.eval(row))),
                _ => {
                    let a = lhs.eval(row);
                    let b = rhs.eval(row);
                    match op {
                        BinaryOp::Add => a + b,
                        BinaryOp::Sub => a - b,
                        BinaryOp::Mul => a * b,
                        BinaryOp::Div => a / b,
                        BinaryOp::Rem => a - b * (a / b).floor(),
                        BinaryOp::Pow => a.powf(b),
                        BinaryOp::Eq => from_bool(a == b),
                        BinaryOp::Ne => from_bool(a != b),
                        BinaryOp::Lt => from_bool(a < b),
                        BinaryOp::Le => from_bool(a <= b),
                        BinaryOp::Gt => from_bool(a > b),
                        BinaryOp::Ge => from_bool(a >= b),
                        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
                    }
                }
            },
            BoundNode::Call { function, args } => {
                let values: Vec<f64> = args.iter().map(|arg| arg.eval(row)).collect();
                function.apply(&values)
            }
        }
    }
}

/// An [`Expression`] whose column references have been resolved to slots.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundExpression {
    root: BoundNode,
}

impl BoundExpression {
    pub fn eval<R: RowValues + ?Sized>(&self, row: &R) -> f64 {
        self.root.eval(row)
    }

    pub fn is_true<R: RowValues + ?Sized>(&self, row: &R) -> bool {
        is_truthy(self.eval(row))
    }
}

/// `target = expression`, one line of a post-allocation update block.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub target: String,
    pub expression: Expression,
}
