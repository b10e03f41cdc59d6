use std::fmt;

use crate::ast::{BinOp, Expr, UnOp};
use crate::token::{Lexer, Tok};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    MissingQuote,
    MissingBracket,
    UnexpectedEol,
    UnknownToken(String),
    BadIdentifier(String),
    BadNumber(String),
    BadEscape,
    RepeatedKeyword(String),
    Expected(&'static str),
    BadDate,
    BadTime,
    TrailingGarbage(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::MissingQuote => write!(f, "Missing quote"),
            Self::MissingBracket => write!(f, "Missing ']'"),
            Self::UnexpectedEol => write!(f, "Unexpected end of line"),
            Self::UnknownToken(ref t) => write!(f, "Unknown token '{}'", t),
            Self::BadIdentifier(ref t) => {
                write!(f, "Invalid identifier '{}'", t)
            }
            Self::BadNumber(ref t) => write!(f, "Bad number '{}'", t),
            Self::BadEscape => {
                write!(f, "\\x00 is not a valid escape sequence")
            }
            Self::RepeatedKeyword(ref k) => {
                write!(f, "{} specified twice", k)
            }
            Self::Expected(what) => write!(f, "Expected {}", what),
            Self::BadDate => write!(f, "Bad date specification"),
            Self::BadTime => write!(f, "Bad time specification"),
            Self::TrailingGarbage(ref t) => {
                write!(f, "Garbage at end of expression: '{}'", t)
            }
        }
    }
}

/// Parse a complete expression; the whole of `src` must be consumed.
pub fn parse_expr(src: &str) -> Result<Expr, ParseError> {
    let mut p = Parser::new(src);
    let expr = p.expr_bp(0)?;
    match p.lexer.next()? {
        None => Ok(expr),
        Some(tok) => Err(ParseError::TrailingGarbage(format!("{:?}", tok))),
    }
}

/// Parse an expression terminated by a top-level `]`, as found spliced
/// into a line after a `[`.  Returns the tree and the byte offset just
/// past the closing bracket.
pub fn parse_expr_spliced(src: &str) -> Result<(Expr, usize), ParseError> {
    let mut p = Parser::new(src);
    let expr = p.expr_bp(0)?;
    match p.lexer.next()? {
        Some(Tok::RBracket) => Ok((expr, p.lexer.pos())),
        Some(tok) => Err(ParseError::TrailingGarbage(format!("{:?}", tok))),
        None => Err(ParseError::MissingBracket),
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
}

fn infix_binding_power(tok: &Tok) -> Option<(u8, u8, BinOp)> {
    let (l, r, op) = match *tok {
        Tok::OrOr => (1, 2, BinOp::Or),
        Tok::AndAnd => (3, 4, BinOp::And),
        Tok::EqEq => (5, 6, BinOp::Eq),
        Tok::Ne => (5, 6, BinOp::Ne),
        Tok::Lt => (7, 8, BinOp::Lt),
        Tok::Le => (7, 8, BinOp::Le),
        Tok::Gt => (7, 8, BinOp::Gt),
        Tok::Ge => (7, 8, BinOp::Ge),
        Tok::Plus => (9, 10, BinOp::Add),
        Tok::Minus => (9, 10, BinOp::Sub),
        Tok::Star => (11, 12, BinOp::Mul),
        Tok::Slash => (11, 12, BinOp::Div),
        Tok::Percent => (11, 12, BinOp::Rem),
        _ => return None,
    };
    Some((l, r, op))
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            lexer: Lexer::new(src),
        }
    }

    fn expr_bp(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.primary()?;
        loop {
            let tok = match self.lexer.peek()? {
                Some(tok) => tok,
                None => break,
            };
            let (l_bp, r_bp, op) = match infix_binding_power(&tok) {
                Some(bp) => bp,
                None => break,
            };
            if l_bp < min_bp {
                break;
            }
            self.lexer.next()?;
            let rhs = self.expr_bp(r_bp)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.lexer.next()?.ok_or(ParseError::UnexpectedEol)?;
        match tok {
            Tok::Int(v) => Ok(Expr::Const(Value::Int(v))),
            Tok::Str(s) => Ok(Expr::Const(Value::Str(s))),
            Tok::SysVar(name) => Ok(Expr::SysVar(name)),
            Tok::Ident(name) => {
                if self.lexer.peek()? == Some(Tok::LParen) {
                    self.lexer.next()?;
                    let args = self.arg_list()?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Tok::LParen => {
                let inner = self.expr_bp(0)?;
                match self.lexer.next()? {
                    Some(Tok::RParen) => Ok(inner),
                    _ => Err(ParseError::Expected(")")),
                }
            }
            Tok::Minus => {
                let inner = self.expr_bp(13)?;
                Ok(Expr::Unary(UnOp::Minus, Box::new(inner)))
            }
            Tok::Plus => {
                let inner = self.expr_bp(13)?;
                Ok(Expr::Unary(UnOp::Plus, Box::new(inner)))
            }
            Tok::Bang => {
                let inner = self.expr_bp(13)?;
                Ok(Expr::Unary(UnOp::Not, Box::new(inner)))
            }
            other => Err(ParseError::UnknownToken(format!("{:?}", other))),
        }
    }

    fn arg_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = vec![];
        if self.lexer.peek()? == Some(Tok::RParen) {
            self.lexer.next()?;
            return Ok(args);
        }
        loop {
            args.push(self.expr_bp(0)?);
            match self.lexer.next()? {
                Some(Tok::Comma) => continue,
                Some(Tok::RParen) => return Ok(args),
                _ => return Err(ParseError::Expected(")")),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_case::test_case;

    fn int(v: i64) -> Expr {
        Expr::Const(Value::Int(v))
    }

    #[test]
    fn precedence() {
        // 2 + 3 * 4 groups the multiplication first.
        let e = parse_expr("2+3*4").unwrap();
        assert_eq!(
            e,
            Expr::Binary(
                BinOp::Add,
                Box::new(int(2)),
                Box::new(Expr::Binary(
                    BinOp::Mul,
                    Box::new(int(3)),
                    Box::new(int(4))
                ))
            )
        );
    }

    #[test]
    fn logical_is_loosest() {
        let e = parse_expr("1 == 2 || 3 < 4 && 5").unwrap();
        match e {
            Expr::Binary(BinOp::Or, _, _) => {}
            other => panic!("wrong root: {:?}", other),
        }
    }

    #[test]
    fn calls_and_vars() {
        let e = parse_expr("max(x, $Today, f())").unwrap();
        assert_eq!(
            e,
            Expr::Call {
                name: "max".into(),
                args: vec![
                    Expr::Var("x".into()),
                    Expr::SysVar("Today".into()),
                    Expr::Call {
                        name: "f".into(),
                        args: vec![]
                    },
                ]
            }
        );
    }

    #[test]
    fn unary_binds_tight() {
        let e = parse_expr("-2+3").unwrap();
        assert_eq!(
            e,
            Expr::Binary(
                BinOp::Add,
                Box::new(Expr::Unary(UnOp::Minus, Box::new(int(2)))),
                Box::new(int(3))
            )
        );
    }

    #[test]
    fn spliced_stops_at_bracket() {
        let (e, consumed) = parse_expr_spliced("1+2] trailing").unwrap();
        assert_eq!(consumed, 4);
        match e {
            Expr::Binary(BinOp::Add, _, _) => {}
            other => panic!("{:?}", other),
        }
    }

    #[test_case("1 +" => matches Err(ParseError::UnexpectedEol))]
    #[test_case("(1" => matches Err(ParseError::Expected(")")))]
    #[test_case("f(1,)" => matches Err(_))]
    #[test_case("1 2" => matches Err(ParseError::TrailingGarbage(_)))]
    fn errors(src: &str) -> Result<Expr, ParseError> {
        parse_expr(src)
    }

    #[test]
    fn missing_close_bracket() {
        assert_eq!(
            parse_expr_spliced("1+2"),
            Err(ParseError::MissingBracket)
        );
    }
}
