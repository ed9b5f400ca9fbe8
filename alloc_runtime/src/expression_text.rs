use thiserror::Error;

use crate::expression::{Assignment, BinaryOp, Expression, Function, Node, UnaryOp};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,
    #[error("unexpected character '{ch}' at offset {position}")]
    UnexpectedChar { ch: char, position: usize },
    #[error("unterminated quoted column name starting at offset {0}")]
    UnterminatedQuote(usize),
    #[error("invalid number '{value}' at offset {position}")]
    InvalidNumber { value: String, position: usize },
    #[error("unexpected '{found}' at offset {position}, expected {expected}")]
    UnexpectedToken {
        found: String,
        position: usize,
        expected: &'static str,
    },
    #[error("unexpected end of expression, expected {0}")]
    UnexpectedEnd(&'static str),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("function '{function}' expects {expected} argument(s), got {found}")]
    Arity {
        function: &'static str,
        expected: &'static str,
        found: usize,
    },
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
    #[error("assignment is missing a target column")]
    MissingTarget,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Quoted(String),
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Amp,
    Pipe,
    Tilde,
    Assign,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(value) => value.to_string(),
            Token::Ident(name) => name.clone(),
            Token::Quoted(name) => format!("`{name}`"),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::Comma => ",".into(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::StarStar => "**".into(),
            Token::Slash => "/".into(),
            Token::Percent => "%".into(),
            Token::EqEq => "==".into(),
            Token::NotEq => "!=".into(),
            Token::Lt => "<".into(),
            Token::Le => "<=".into(),
            Token::Gt => ">".into(),
            Token::Ge => ">=".into(),
            Token::Amp => "&".into(),
            Token::Pipe => "|".into(),
            Token::Tilde => "~".into(),
            Token::Assign => "=".into(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (position, ch) = chars[i];
        let next = chars.get(i + 1).map(|&(_, c)| c);

        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        if ch.is_ascii_digit() || (ch == '.' && next.is_some_and(|c| c.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                i += 1;
            }
            if i < chars.len() && matches!(chars[i].1, 'e' | 'E') {
                let mut j = i + 1;
                if j < chars.len() && matches!(chars[j].1, '+' | '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].1.is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].1.is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().map(|&(_, c)| c).collect();
            let value = text.parse::<f64>().map_err(|_| ExprError::InvalidNumber {
                value: text.clone(),
                position,
            })?;
            tokens.push((Token::Number(value), position));
            continue;
        }

        if ch.is_alphabetic() || ch == '_' {
            let start = i;
            while i < chars.len()
                && (chars[i].1.is_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '.')
            {
                i += 1;
            }
            let text: String = chars[start..i].iter().map(|&(_, c)| c).collect();
            tokens.push((Token::Ident(text), position));
            continue;
        }

        if ch == '`' {
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && chars[end].1 != '`' {
                end += 1;
            }
            if end >= chars.len() {
                return Err(ExprError::UnterminatedQuote(position));
            }
            let text: String = chars[start..end].iter().map(|&(_, c)| c).collect();
            tokens.push((Token::Quoted(text), position));
            i = end + 1;
            continue;
        }

        let (token, width) = match (ch, next) {
            ('*', Some('*')) => (Token::StarStar, 2),
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('&', Some('&')) => (Token::Amp, 2),
            ('|', Some('|')) => (Token::Pipe, 2),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            (',', _) => (Token::Comma, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('&', _) => (Token::Amp, 1),
            ('|', _) => (Token::Pipe, 1),
            ('~', _) => (Token::Tilde, 1),
            ('=', _) => (Token::Assign, 1),
            (other, _) => {
                return Err(ExprError::UnexpectedChar {
                    ch: other,
                    position,
                })
            }
        };
        tokens.push((token, position));
        i += width;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    cursor: usize,
}

impl Parser {
    fn new(tokens: Vec<(Token, usize)>) -> Self {
        Self { tokens, cursor: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|(token, _)| token)
    }

    fn advance(&mut self) -> Option<(Token, usize)> {
        let item = self.tokens.get(self.cursor).cloned();
        if item.is_some() {
            self.cursor += 1;
        }
        item
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name == keyword)
    }

    fn expect(&mut self, wanted: Token, expected: &'static str) -> Result<(), ExprError> {
        match self.advance() {
            Some((token, _)) if token == wanted => Ok(()),
            Some((token, position)) => Err(ExprError::UnexpectedToken {
                found: token.describe(),
                position,
                expected,
            }),
            None => Err(ExprError::UnexpectedEnd(expected)),
        }
    }

    fn finish(&mut self) -> Result<(), ExprError> {
        match self.advance() {
            None => Ok(()),
            Some((token, position)) => Err(ExprError::UnexpectedToken {
                found: token.describe(),
                position,
                expected: "end of expression",
            }),
        }
    }

    fn parse_or(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Pipe)) || self.peek_keyword("or") {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Node::binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.parse_not()?;
        while matches!(self.peek(), Some(Token::Amp)) || self.peek_keyword("and") {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Node::binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Node, ExprError> {
        if matches!(self.peek(), Some(Token::Tilde)) || self.peek_keyword("not") {
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Node::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    /// Chained comparisons (`a < b <= c`) expand to a conjunction of pairs.
    fn parse_comparison(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.parse_additive()?;
        let mut chain: Option<Node> = None;
        while let Some(op) = self.peek().and_then(comparison_op) {
            self.advance();
            let rhs = self.parse_additive()?;
            let pair = Node::binary(op, lhs, rhs.clone());
            chain = Some(match chain {
                None => pair,
                Some(prev) => Node::binary(BinaryOp::And, prev, pair),
            });
            lhs = rhs;
        }
        Ok(chain.unwrap_or(lhs))
    }

    fn parse_additive(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Node::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Node, ExprError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Node::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Node, ExprError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Node::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                })
            }
            Some(Token::Plus) => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Node, ExprError> {
        let base = self.parse_primary()?;
        if matches!(self.peek(), Some(Token::StarStar)) {
            self.advance();
            let exponent = self.parse_unary()?;
            return Ok(Node::binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Node, ExprError> {
        let (token, position) = self
            .advance()
            .ok_or(ExprError::UnexpectedEnd("a value"))?;
        match token {
            Token::Number(value) => Ok(Node::Number(value)),
            Token::Quoted(name) => Ok(Node::Column(name)),
            Token::Ident(name) => match name.as_str() {
                "True" | "true" => Ok(Node::Number(1.0)),
                "False" | "false" => Ok(Node::Number(0.0)),
                _ if matches!(self.peek(), Some(Token::LParen)) => self.parse_call(name),
                _ => Ok(Node::Column(name)),
            },
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            other => Err(ExprError::UnexpectedToken {
                found: other.describe(),
                position,
                expected: "a value",
            }),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Node, ExprError> {
        let function = parse_function(&name)?;
        self.expect(Token::LParen, "'('")?;
        let mut args = Vec::new();
        if !matches!(self.peek(), Some(Token::RParen)) {
            loop {
                args.push(self.parse_or()?);
                if matches!(self.peek(), Some(Token::Comma)) {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect(Token::RParen, "')'")?;

        let (expected, ok) = match function {
            Function::Min | Function::Max => ("at least 1", !args.is_empty()),
            _ => ("1", args.len() == 1),
        };
        if !ok {
            return Err(ExprError::Arity {
                function: function.name(),
                expected,
                found: args.len(),
            });
        }
        Ok(Node::Call { function, args })
    }
}

fn comparison_op(token: &Token) -> Option<BinaryOp> {
    match token {
        Token::EqEq => Some(BinaryOp::Eq),
        Token::NotEq => Some(BinaryOp::Ne),
        Token::Lt => Some(BinaryOp::Lt),
        Token::Le => Some(BinaryOp::Le),
        Token::Gt => Some(BinaryOp::Gt),
        Token::Ge => Some(BinaryOp::Ge),
        _ => None,
    }
}

fn parse_function(name: &str) -> Result<Function, ExprError> {
    match name {
        "abs" => Ok(Function::Abs),
        "min" => Ok(Function::Min),
        "max" => Ok(Function::Max),
        "log" => Ok(Function::Log),
        "exp" => Ok(Function::Exp),
        "sqrt" => Ok(Function::Sqrt),
        "floor" => Ok(Function::Floor),
        "ceil" => Ok(Function::Ceil),
        other => Err(ExprError::UnknownFunction(other.to_string())),
    }
}

pub fn parse_expression(input: &str) -> Result<Expression, ExprError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ExprError::Empty);
    }

    let mut parser = Parser::new(tokenize(trimmed)?);
    let root = parser.parse_or()?;
    parser.finish()?;
    Ok(Expression::from_parts(trimmed.to_string(), root))
}

/// Parses `target = expression`, as used by post-allocation update blocks.
pub fn parse_assignment(input: &str) -> Result<Assignment, ExprError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ExprError::Empty);
    }

    let tokens = tokenize(trimmed)?;
    let target = match tokens.first() {
        Some((Token::Ident(name), _)) | Some((Token::Quoted(name), _)) => name.clone(),
        _ => return Err(ExprError::MissingTarget),
    };
    match tokens.get(1) {
        Some((Token::Assign, position)) => {
            let body = &trimmed[position + 1..];
            let expression = parse_expression(body)?;
            Ok(Assignment { target, expression })
        }
        Some((token, position)) => Err(ExprError::UnexpectedToken {
            found: token.describe(),
            position: *position,
            expected: "'='",
        }),
        None => Err(ExprError::UnexpectedEnd("'='")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str, columns: &[(&str, f64)]) -> f64 {
        let expression = parse_expression(source).expect("expression parses");
        let bound = expression
            .bind(|name| columns.iter().position(|(column, _)| *column == name))
            .expect("columns bind");
        let row: Vec<f64> = columns.iter().map(|(_, value)| *value).collect();
        bound.eval(row.as_slice())
    }

    #[test]
    fn arithmetic_precedence_matches_python() {
        assert_eq!(eval("1 + 2 * 3", &[]), 7.0);
        assert_eq!(eval("(1 + 2) * 3", &[]), 9.0);
        assert_eq!(eval("-2 ** 2", &[]), -4.0);
        assert_eq!(eval("2 ** 3 ** 2", &[]), 512.0);
        assert_eq!(eval("-7 % 3", &[]), 2.0);
    }

    #[test]
    fn ampersand_binds_looser_than_comparison() {
        let columns = [("a", 5.0), ("b", 0.0)];
        assert_eq!(eval("a > 1 & b == 0", &columns), 1.0);
        assert_eq!(eval("a > 1 and b > 0 or a == 5", &columns), 1.0);
        assert_eq!(eval("~(a > 1) | b", &columns), 0.0);
        assert_eq!(eval("not b", &columns), 1.0);
    }

    #[test]
    fn chained_comparison_expands_to_conjunction() {
        assert_eq!(eval("0 < x <= 10", &[("x", 10.0)]), 1.0);
        assert_eq!(eval("0 < x <= 10", &[("x", 11.0)]), 0.0);
    }

    #[test]
    fn functions_and_quoted_columns() {
        let columns = [("parcel area", 43560.0), ("units", 3.0)];
        assert_eq!(eval("ceil(`parcel area` / 43560 * 2.5)", &columns), 3.0);
        assert_eq!(eval("max(units, 4, 1)", &columns), 4.0);
        assert_eq!(eval("min(units)", &columns), 3.0);
        assert!((eval("log(exp(1.5))", &columns) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn identifiers_may_contain_dots() {
        assert_eq!(eval("1e2 + 2.5E-1", &[]), 100.25);
        assert_eq!(eval("bld.age * 2", &[("bld.age", 4.0)]), 8.0);
    }

    #[test]
    fn parse_errors_are_reported() {
        assert_eq!(parse_expression("   "), Err(ExprError::Empty));
        assert!(matches!(
            parse_expression("a +"),
            Err(ExprError::UnexpectedEnd(_))
        ));
        assert!(matches!(
            parse_expression("a $ b"),
            Err(ExprError::UnexpectedChar { ch: '$', .. })
        ));
        assert!(matches!(
            parse_expression("(a + b"),
            Err(ExprError::UnexpectedEnd("')'"))
        ));
        assert!(matches!(
            parse_expression("a b"),
            Err(ExprError::UnexpectedToken { .. })
        ));
        assert_eq!(
            parse_expression("bogus(1)"),
            Err(ExprError::UnknownFunction("bogus".into()))
        );
        assert!(matches!(
            parse_expression("abs(1, 2)"),
            Err(ExprError::Arity { found: 2, .. })
        ));
        assert!(matches!(
            parse_expression("`open"),
            Err(ExprError::UnterminatedQuote(0))
        ));
    }

    #[test]
    fn assignment_splits_target_and_body() {
        let assignment = parse_assignment("TOT_DU_final = TOT_DU + SFDU_new").unwrap();
        assert_eq!(assignment.target, "TOT_DU_final");
        assert_eq!(assignment.expression.source(), "TOT_DU + SFDU_new");

        let quoted = parse_assignment("`new units` = a == b").unwrap();
        assert_eq!(quoted.target, "new units");
        assert_eq!(quoted.expression.source(), "a == b");

        assert_eq!(parse_assignment("= 1"), Err(ExprError::MissingTarget));
        assert!(matches!(
            parse_assignment("a == 1"),
            Err(ExprError::UnexpectedToken { .. })
        ));
    }
}
