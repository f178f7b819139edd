//! Recursive descent parser for option and order expressions.
//!
//! Precedence from lowest to highest:
//! 1. `a if c else b`
//! 2. `or`
//! 3. `and`
//! 4. `not`
//! 5. comparisons (`==`, `!=`, `<`, `<=`, `>`, `>=`, `in`, `not in`), chainable
//! 6. `|`, then `^`, then `&`
//! 7. `<<`, `>>`
//! 8. `+`, `-`
//! 9. `*`, `/`, `//`, `%`
//! 10. unary `-`, `+`, `~`
//! 11. `**` (right-associative, binds tighter than a unary operator on its left)

use super::ast::{BinOp, BoolOp, CmpOp, Expr, UnaryOp};
use super::lexer::{tokenize, Token};
use dse_types::ExprError;

/// Deepest nesting of groups and operator chains a parse accepts.
pub const MAX_NESTING: usize = 64;

/// Parses a complete expression.
pub fn parse(source: &str) -> Result<Expr, ExprError> {
    let syntax = |message: String| ExprError::Syntax {
        expr: source.to_string(),
        message,
    };
    let tokens = tokenize(source).map_err(syntax)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_test().map_err(syntax)?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(syntax(format!("unexpected `{token}` after expression"))),
    }
}

type ParseResult<T> = Result<T, String>;

struct Parser<'src> {
    tokens: &'src [Token],
    pos: usize,
    depth: usize,
}

impl<'src> Parser<'src> {
    fn peek(&self) -> Option<&'src Token> {
        self.tokens.get(self.pos)
    }

    fn peek_nth(&self, n: usize) -> Option<&'src Token> {
        self.tokens.get(self.pos + n)
    }

    fn advance(&mut self) -> Option<&'src Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek() == Some(expected)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> ParseResult<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(match self.peek() {
                Some(found) => format!("expected `{expected}` but found `{found}`"),
                None => format!("expected `{expected}` but reached the end"),
            })
        }
    }

    fn enter(&mut self) -> ParseResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(format!("expression nests deeper than {MAX_NESTING} levels"));
        }
        self.depth += 1;
        Ok(())
    }

    fn nested(&mut self, parse: fn(&mut Self) -> ParseResult<Expr>) -> ParseResult<Expr> {
        self.enter()?;
        let expr = parse(self);
        self.depth -= 1;
        expr
    }

    fn parse_test(&mut self) -> ParseResult<Expr> {
        self.nested(Self::parse_conditional)
    }

    fn parse_conditional(&mut self) -> ParseResult<Expr> {
        let body = self.parse_or()?;
        if !self.eat(&Token::If) {
            return Ok(body);
        }
        let cond = self.parse_or()?;
        self.expect(&Token::Else)?;
        let orelse = self.parse_test()?;
        Ok(Expr::IfElse {
            body: Box::new(body),
            cond: Box::new(cond),
            orelse: Box::new(orelse),
        })
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_and()?;
        let mut chained = 0;
        while self.eat(&Token::Or) {
            self.enter()?;
            chained += 1;
            let right = self.parse_and()?;
            left = Expr::Logical {
                op: BoolOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth -= chained;
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_not()?;
        let mut chained = 0;
        while self.eat(&Token::And) {
            self.enter()?;
            chained += 1;
            let right = self.parse_not()?;
            left = Expr::Logical {
                op: BoolOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth -= chained;
        Ok(left)
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if self.eat(&Token::Not) {
            let operand = self.nested(Self::parse_not)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn comparison_op(&self) -> Option<(CmpOp, usize)> {
        let op = match self.peek()? {
            Token::EqEq => CmpOp::Eq,
            Token::NotEq => CmpOp::NotEq,
            Token::Lt => CmpOp::Lt,
            Token::LtEq => CmpOp::LtEq,
            Token::Gt => CmpOp::Gt,
            Token::GtEq => CmpOp::GtEq,
            Token::In => CmpOp::In,
            Token::Not if self.peek_nth(1) == Some(&Token::In) => return Some((CmpOp::NotIn, 2)),
            _ => return None,
        };
        Some((op, 1))
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let left = self.parse_bitor()?;
        let mut rest = Vec::new();
        while let Some((op, width)) = self.comparison_op() {
            self.pos += width;
            rest.push((op, self.parse_bitor()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                rest,
            })
        }
    }

    /// One left-associative binary precedence level.
    fn parse_binary_level(
        &mut self,
        ops: &[(Token, BinOp)],
        next: fn(&mut Self) -> ParseResult<Expr>,
    ) -> ParseResult<Expr> {
        let mut left = next(self)?;
        let mut chained = 0;
        'outer: loop {
            for (token, op) in ops {
                if self.eat(token) {
                    self.enter()?;
                    chained += 1;
                    let right = next(self)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            self.depth -= chained;
            return Ok(left);
        }
    }

    fn parse_bitor(&mut self) -> ParseResult<Expr> {
        self.parse_binary_level(&[(Token::Pipe, BinOp::BitOr)], Self::parse_bitxor)
    }

    fn parse_bitxor(&mut self) -> ParseResult<Expr> {
        self.parse_binary_level(&[(Token::Caret, BinOp::BitXor)], Self::parse_bitand)
    }

    fn parse_bitand(&mut self) -> ParseResult<Expr> {
        self.parse_binary_level(&[(Token::Amp, BinOp::BitAnd)], Self::parse_shift)
    }

    fn parse_shift(&mut self) -> ParseResult<Expr> {
        self.parse_binary_level(
            &[(Token::Shl, BinOp::Shl), (Token::Shr, BinOp::Shr)],
            Self::parse_arith,
        )
    }

    fn parse_arith(&mut self) -> ParseResult<Expr> {
        self.parse_binary_level(
            &[(Token::Plus, BinOp::Add), (Token::Minus, BinOp::Sub)],
            Self::parse_term,
        )
    }

    fn parse_term(&mut self) -> ParseResult<Expr> {
        self.parse_binary_level(
            &[
                (Token::Star, BinOp::Mul),
                (Token::Slash, BinOp::Div),
                (Token::DoubleSlash, BinOp::FloorDiv),
                (Token::Percent, BinOp::Mod),
            ],
            Self::parse_factor,
        )
    }

    fn parse_factor(&mut self) -> ParseResult<Expr> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => UnaryOp::Pos,
            Some(Token::Tilde) => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        self.pos += 1;
        let operand = self.nested(Self::parse_factor)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_power(&mut self) -> ParseResult<Expr> {
        let base = self.parse_postfix()?;
        if self.eat(&Token::DoubleStar) {
            let exponent = self.nested(Self::parse_factor)?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.eat(&Token::LParen) {
                let func = match expr {
                    Expr::Name(name) => name,
                    _ => return Err("only named functions can be called".to_string()),
                };
                let args = self.parse_args()?;
                expr = Expr::Call { func, args };
            } else if self.eat(&Token::LBracket) {
                let index = self.parse_test()?;
                self.expect(&Token::RBracket)?;
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_args(&mut self) -> ParseResult<Vec<Expr>> {
        let mut args = Vec::new();
        while !self.eat(&Token::RParen) {
            args.push(self.parse_test()?);
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RParen)?;
                break;
            }
        }
        Ok(args)
    }

    fn parse_atom(&mut self) -> ParseResult<Expr> {
        let token = self
            .advance()
            .ok_or_else(|| "unexpected end of expression".to_string())?;
        match token {
            Token::Int(v) => Ok(Expr::Int(*v)),
            Token::Float(v) => Ok(Expr::Float(*v)),
            Token::Str(v) => {
                // Adjacent string literals concatenate.
                let mut text = v.clone();
                while let Some(Token::Str(next)) = self.peek() {
                    text.push_str(next);
                    self.pos += 1;
                }
                Ok(Expr::Str(text))
            }
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::Ident(name) => Ok(Expr::Name(name.clone())),
            Token::LParen => {
                let inner = self.parse_test()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => self.parse_list(),
            other => Err(format!("unexpected `{other}`")),
        }
    }

    /// Parses the remainder of a list display or comprehension after `[`.
    fn parse_list(&mut self) -> ParseResult<Expr> {
        if self.eat(&Token::RBracket) {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.parse_test()?;
        if self.eat(&Token::For) {
            let var = match self.advance() {
                Some(Token::Ident(name)) => name.clone(),
                Some(other) => return Err(format!("expected loop variable but found `{other}`")),
                None => return Err("expected loop variable but reached the end".to_string()),
            };
            self.expect(&Token::In)?;
            let iter = self.parse_or()?;
            let mut conds = Vec::new();
            while self.eat(&Token::If) {
                conds.push(self.parse_or()?);
            }
            self.expect(&Token::RBracket)?;
            return Ok(Expr::ListComp {
                elt: Box::new(first),
                var,
                iter: Box::new(iter),
                conds,
            });
        }

        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.check(&Token::RBracket) {
                break;
            }
            items.push(self.parse_test()?);
        }
        self.expect(&Token::RBracket)?;
        Ok(Expr::List(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str) -> Box<Expr> {
        Box::new(Expr::Name(n.to_string()))
    }

    #[test]
    fn test_bitand_binds_tighter_than_comparison() {
        let expr = parse("A&(A-1)==0").unwrap();
        let Expr::Compare { left, rest } = expr else {
            panic!("expected comparison");
        };
        assert!(matches!(*left, Expr::Binary { op: BinOp::BitAnd, .. }));
        assert_eq!(rest, vec![(CmpOp::Eq, Expr::Int(0))]);
    }

    #[test]
    fn test_power_is_right_associative_and_binds_over_unary() {
        let expr = parse("-x**2").unwrap();
        assert_eq!(
            expr,
            Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(Expr::Binary {
                    op: BinOp::Pow,
                    left: name("x"),
                    right: Box::new(Expr::Int(2)),
                }),
            }
        );
        let Expr::Binary { right, .. } = parse("2**3**2").unwrap() else {
            panic!("expected power");
        };
        assert!(matches!(*right, Expr::Binary { op: BinOp::Pow, .. }));
    }

    #[test]
    fn test_or_and_precedence() {
        let expr = parse("x==0 or B!='flatten' and C!='flatten'").unwrap();
        let Expr::Logical { op, right, .. } = expr else {
            panic!("expected logical");
        };
        assert_eq!(op, BoolOp::Or);
        assert!(matches!(*right, Expr::Logical { op: BoolOp::And, .. }));
    }

    #[test]
    fn test_list_comprehension() {
        let expr = parse("[x for x in range(10) if x==0 or B!='flatten']").unwrap();
        let Expr::ListComp { var, iter, conds, .. } = expr else {
            panic!("expected comprehension");
        };
        assert_eq!(var, "x");
        assert!(matches!(*iter, Expr::Call { ref func, .. } if func == "range"));
        assert_eq!(conds.len(), 1);
    }

    #[test]
    fn test_ternary_and_not_in() {
        let expr = parse("0 if x not in [1, 2] else 1").unwrap();
        let Expr::IfElse { cond, .. } = expr else {
            panic!("expected ternary");
        };
        assert!(matches!(*cond, Expr::Compare { ref rest, .. } if rest[0].0 == CmpOp::NotIn));
    }

    #[test]
    fn test_syntax_errors() {
        for bad in [
            "[x, y for x in range(3)]",
            "[ for x in range(3)]",
            "0 if x!='flatten'",
            "[1, 2",
            "(1 + )",
            "x y",
            "",
        ] {
            assert!(
                matches!(parse(bad), Err(ExprError::Syntax { .. })),
                "`{bad}` should not parse"
            );
        }
    }

    #[test]
    fn test_nesting_is_bounded() {
        let shallow = format!("{}1{}", "(".repeat(20), ")".repeat(20));
        assert_eq!(parse(&shallow).unwrap(), Expr::Int(1));

        let deep_parens = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        let deep_lists = format!("{}1{}", "[".repeat(10_000), "]".repeat(10_000));
        let long_chain = vec!["1"; 10_000].join(" + ");
        let unary = format!("{}1", "-".repeat(10_000));
        let nots = format!("{}x", "not ".repeat(10_000));
        for source in [deep_parens, deep_lists, long_chain, unary, nots] {
            assert!(matches!(parse(&source), Err(ExprError::Syntax { .. })));
        }
        assert!(parse(&vec!["x"; 40].join(" and ")).is_ok());
    }

    #[test]
    fn test_trailing_comma_and_empty_list() {
        assert_eq!(
            parse("[1, 'a',]").unwrap(),
            Expr::List(vec![Expr::Int(1), Expr::Str("a".to_string())])
        );
        assert_eq!(parse("[]").unwrap(), Expr::List(Vec::new()));
    }
}
