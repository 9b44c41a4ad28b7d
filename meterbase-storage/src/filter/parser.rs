//! Recursive-descent parser for filter text.

use meterbase_core::error::{Error, Result};

use super::{CompareOp, Comparator, FilterExpr, Predicate};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(String),
    Op(CompareOp),
    LParen,
    RParen,
    Comma,
}

fn invalid(offset: usize, message: impl Into<String>) -> Error {
    Error::InvalidFilter {
        offset,
        message: message.into(),
    }
}

fn lex(input: &str) -> Result<Vec<(usize, Token)>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            b'(' => {
                tokens.push((i, Token::LParen));
                i += 1;
            }
            b')' => {
                tokens.push((i, Token::RParen));
                i += 1;
            }
            b',' => {
                tokens.push((i, Token::Comma));
                i += 1;
            }
            b'\'' => {
                let start = i;
                let mut value = Vec::new();
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => return Err(invalid(start, "unterminated literal")),
                        Some(b'\'') if bytes.get(i + 1) == Some(&b'\'') => {
                            value.push(b'\'');
                            i += 2;
                        }
                        Some(b'\'') => {
                            i += 1;
                            break;
                        }
                        Some(&b) => {
                            value.push(b);
                            i += 1;
                        }
                    }
                }
                let value = String::from_utf8(value)
                    .map_err(|_| invalid(start, "literal is not UTF-8"))?;
                tokens.push((start, Token::Literal(value)));
            }
            b'=' | b'<' | b'>' | b'!' => {
                let start = i;
                let two = input.get(i..i + 2);
                let symbol = match two {
                    Some(s @ ("<=" | ">=" | "!=")) => s,
                    _ => &input[i..i + 1],
                };
                let op = CompareOp::from_symbol(symbol)
                    .ok_or_else(|| invalid(start, format!("unknown operator '{}'", symbol)))?;
                tokens.push((start, Token::Op(op)));
                i += symbol.len();
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                tokens.push((start, Token::Ident(input[start..i].to_string())));
            }
            _ => {
                let ch = input[i..].chars().next().unwrap_or('?');
                return Err(invalid(i, format!("unexpected character '{}'", ch)));
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug)]
enum Arg {
    Literal(String),
    Op(CompareOp),
    Bool(bool),
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(o, _)| *o).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<(usize, Token)> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<()> {
        match self.next() {
            Some((_, tok)) if tok == expected => Ok(()),
            Some((offset, tok)) => Err(invalid(offset, format!("expected {}, found {:?}", what, tok))),
            None => Err(invalid(self.end, format!("expected {}, found end of input", what))),
        }
    }

    fn expression(&mut self) -> Result<FilterExpr> {
        let mut expr = FilterExpr::new();
        if self.tokens.is_empty() {
            return Ok(expr);
        }
        expr.push(self.predicate()?);
        while let Some((offset, tok)) = self.next() {
            match tok {
                Token::Ident(word) if word == "AND" => expr.push(self.predicate()?),
                other => return Err(invalid(offset, format!("expected AND, found {:?}", other))),
            }
        }
        Ok(expr)
    }

    fn predicate(&mut self) -> Result<Predicate> {
        let (start, name) = match self.next() {
            Some((offset, Token::Ident(name))) => (offset, name),
            Some((offset, tok)) => {
                return Err(invalid(offset, format!("expected filter name, found {:?}", tok)))
            }
            None => return Err(invalid(self.end, "expected filter name, found end of input")),
        };
        self.expect(Token::LParen, "'('")?;

        let mut args = Vec::new();
        loop {
            let offset = self.offset();
            let arg = match self.next() {
                Some((_, Token::Literal(s))) => Arg::Literal(s),
                Some((_, Token::Op(op))) => Arg::Op(op),
                Some((_, Token::Ident(w))) if w == "true" => Arg::Bool(true),
                Some((_, Token::Ident(w))) if w == "false" => Arg::Bool(false),
                Some((o, tok)) => return Err(invalid(o, format!("unexpected argument {:?}", tok))),
                None => return Err(invalid(self.end, "unterminated argument list")),
            };
            args.push((offset, arg));
            match self.next() {
                Some((_, Token::Comma)) => continue,
                Some((_, Token::RParen)) => break,
                Some((o, tok)) => return Err(invalid(o, format!("expected ',' or ')', found {:?}", tok))),
                None => return Err(invalid(self.end, "unterminated argument list")),
            }
        }

        build(start, &name, args)
    }
}

fn literal_arg(args: &[(usize, Arg)], i: usize, at: usize) -> Result<String> {
    match args.get(i) {
        Some((_, Arg::Literal(s))) => Ok(s.clone()),
        Some((o, other)) => Err(invalid(*o, format!("expected quoted literal, found {:?}", other))),
        None => Err(invalid(at, format!("missing argument {}", i + 1))),
    }
}

fn op_arg(args: &[(usize, Arg)], i: usize, at: usize) -> Result<CompareOp> {
    match args.get(i) {
        Some((_, Arg::Op(op))) => Ok(*op),
        Some((o, other)) => Err(invalid(*o, format!("expected operator, found {:?}", other))),
        None => Err(invalid(at, format!("missing argument {}", i + 1))),
    }
}

fn bool_arg(args: &[(usize, Arg)], i: usize) -> Result<Option<bool>> {
    match args.get(i) {
        Some((_, Arg::Bool(b))) => Ok(Some(*b)),
        Some((o, other)) => Err(invalid(*o, format!("expected true or false, found {:?}", other))),
        None => Ok(None),
    }
}

fn comparator_arg(args: &[(usize, Arg)], i: usize, at: usize) -> Result<Comparator> {
    let offset = args.get(i).map(|(o, _)| *o).unwrap_or(at);
    literal_arg(args, i, at)?.parse::<Comparator>().map_err(|e| match e {
        Error::InvalidFilter { message, .. } => invalid(offset, message),
        other => other,
    })
}

fn arity(name: &str, args: &[(usize, Arg)], at: usize, min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        return Err(invalid(
            at,
            format!("{} takes {}..={} arguments, got {}", name, min, max, args.len()),
        ));
    }
    Ok(())
}

fn build(at: usize, name: &str, args: Vec<(usize, Arg)>) -> Result<Predicate> {
    match name {
        "SingleColumnValueFilter" => {
            arity(name, &args, at, 4, 6)?;
            Ok(Predicate::SingleColumnValue {
                family: literal_arg(&args, 0, at)?,
                qualifier: literal_arg(&args, 1, at)?,
                op: op_arg(&args, 2, at)?,
                comparator: comparator_arg(&args, 3, at)?,
                if_missing: bool_arg(&args, 4)?,
                latest_only: bool_arg(&args, 5)?,
            })
        }
        "ColumnPrefixFilter" => {
            arity(name, &args, at, 1, 1)?;
            Ok(Predicate::ColumnPrefix {
                prefix: literal_arg(&args, 0, at)?,
            })
        }
        "RowFilter" => {
            arity(name, &args, at, 2, 2)?;
            Ok(Predicate::Row {
                op: op_arg(&args, 0, at)?,
                comparator: comparator_arg(&args, 1, at)?,
            })
        }
        "QualifierFilter" => {
            arity(name, &args, at, 2, 2)?;
            Ok(Predicate::Qualifier {
                op: op_arg(&args, 0, at)?,
                comparator: comparator_arg(&args, 1, at)?,
            })
        }
        other => Err(invalid(at, format!("unknown filter '{}'", other))),
    }
}

/// Parse filter text into an expression
pub fn parse(input: &str) -> Result<FilterExpr> {
    let tokens = lex(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
    };
    parser.expression()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scenario_expression() {
        let text = r#"SingleColumnValueFilter ('f', 'user_id', =, 'binary:"u1"', true, true) AND SingleColumnValueFilter ('f', 's_src1', =, 'binary:"1"', true, true)"#;
        let expr = parse(text).unwrap();
        assert_eq!(expr.predicates().len(), 2);
        assert_eq!(expr.to_string(), text);
    }

    #[test]
    fn test_parse_doubled_quotes() {
        let expr = parse("ColumnPrefixFilter ('it''s')").unwrap();
        assert_eq!(
            expr.predicates()[0],
            Predicate::ColumnPrefix { prefix: "it's".into() }
        );
    }

    #[test]
    fn test_parse_operators() {
        let expr = parse("QualifierFilter (>=, 'binaryprefix:m_9') AND RowFilter (=, 'regexstring:r.*')").unwrap();
        assert_eq!(
            expr.predicates()[0],
            Predicate::Qualifier {
                op: CompareOp::Ge,
                comparator: Comparator::BinaryPrefix("m_9".into())
            }
        );
        assert_eq!(
            expr.predicates()[1],
            Predicate::Row {
                op: CompareOp::Eq,
                comparator: Comparator::RegexString("r.*".into())
            }
        );
    }

    #[test]
    fn test_parse_errors_carry_offsets() {
        match parse("ColumnPrefixFilter ('m_'").unwrap_err() {
            Error::InvalidFilter { offset, .. } => assert_eq!(offset, 24),
            other => panic!("unexpected error {:?}", other),
        }
        match parse("Bogus ('x')").unwrap_err() {
            Error::InvalidFilter { offset, .. } => assert_eq!(offset, 0),
            other => panic!("unexpected error {:?}", other),
        }
        match parse("RowFilter (=, 'nosuch:x')").unwrap_err() {
            Error::InvalidFilter { offset, .. } => assert_eq!(offset, 14),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(parse("ColumnPrefixFilter ('a') OR ColumnPrefixFilter ('b')").is_err());
        assert!(parse("ColumnPrefixFilter ('unterminated)").is_err());
    }

    #[test]
    fn test_empty_input() {
        assert!(parse("   ").unwrap().is_empty());
    }
}
