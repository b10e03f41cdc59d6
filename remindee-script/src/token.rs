use crate::parser::ParseError;

/// One lexical token of the expression language.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Int(i64),
    Str(String),
    Ident(String),
    SysVar(String),
    LParen,
    RParen,
    RBracket,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    AndAnd,
    OrOr,
    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Byte-oriented tokenizer over a single expression source fragment.
/// The enclosing `[` has already been consumed by the caller; a `]` at
/// the top level is returned as [`Tok::RBracket`] so the caller can
/// resume consuming the surrounding text.
pub struct Lexer<'a> {
    src: &'a [u8],
    text: &'a str,
    pos: usize,
    peeked: Option<Option<Tok>>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            text: src,
            pos: 0,
            peeked: None,
        }
    }

    /// Byte offset just past the last consumed token.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn peek(&mut self) -> Result<Option<Tok>, ParseError> {
        if self.peeked.is_none() {
            let saved = self.pos;
            let tok = self.lex()?;
            if tok.is_none() {
                self.pos = saved;
            }
            self.peeked = Some(tok);
        }
        Ok(self.peeked.clone().unwrap())
    }

    pub fn next(&mut self) -> Result<Option<Tok>, ParseError> {
        if let Some(tok) = self.peeked.take() {
            return Ok(tok);
        }
        self.lex()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.src.get(self.pos).copied();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn peek_byte(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn lex(&mut self) -> Result<Option<Tok>, ParseError> {
        while matches!(self.peek_byte(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
        let c = match self.bump() {
            Some(c) => c,
            None => return Ok(None),
        };
        let tok = match c {
            b'(' => Tok::LParen,
            b')' => Tok::RParen,
            b']' => Tok::RBracket,
            b',' => Tok::Comma,
            b'+' => Tok::Plus,
            b'-' => Tok::Minus,
            b'*' => Tok::Star,
            b'/' => Tok::Slash,
            b'%' => Tok::Percent,
            b'!' => {
                if self.peek_byte() == Some(b'=') {
                    self.pos += 1;
                    Tok::Ne
                } else {
                    Tok::Bang
                }
            }
            b'&' => {
                if self.bump() == Some(b'&') {
                    Tok::AndAnd
                } else {
                    return Err(ParseError::UnknownToken("&".into()));
                }
            }
            b'|' => {
                if self.bump() == Some(b'|') {
                    Tok::OrOr
                } else {
                    return Err(ParseError::UnknownToken("|".into()));
                }
            }
            b'=' => {
                if self.peek_byte() == Some(b'=') {
                    self.pos += 1;
                }
                // A single '=' is accepted as equality, as SET scripts
                // habitually write it.
                Tok::EqEq
            }
            b'<' => {
                if self.peek_byte() == Some(b'=') {
                    self.pos += 1;
                    Tok::Le
                } else {
                    Tok::Lt
                }
            }
            b'>' => {
                if self.peek_byte() == Some(b'=') {
                    self.pos += 1;
                    Tok::Ge
                } else {
                    Tok::Gt
                }
            }
            b'"' => Tok::Str(self.lex_string()?),
            b'0'..=b'9' => {
                let start = self.pos - 1;
                while matches!(self.peek_byte(), Some(b'0'..=b'9')) {
                    self.pos += 1;
                }
                let text = &self.text[start..self.pos];
                Tok::Int(
                    text.parse()
                        .map_err(|_| ParseError::BadNumber(text.into()))?,
                )
            }
            b'$' | b'_' | b'a'..=b'z' | b'A'..=b'Z' => {
                let start = self.pos - 1;
                while matches!(
                    self.peek_byte(),
                    Some(b'_' | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z')
                ) {
                    self.pos += 1;
                }
                let text = self.text[start..self.pos].to_owned();
                if let Some(name) = text.strip_prefix('$') {
                    if name.is_empty() {
                        return Err(ParseError::BadIdentifier(text));
                    }
                    Tok::SysVar(name.to_owned())
                } else {
                    Tok::Ident(text)
                }
            }
            _ => {
                // Report the whole (possibly multi-byte) character.
                let ch = self.text[self.pos - 1..]
                    .chars()
                    .next()
                    .unwrap_or('?');
                return Err(ParseError::UnknownToken(ch.to_string()));
            }
        };
        Ok(Some(tok))
    }

    fn lex_string(&mut self) -> Result<String, ParseError> {
        let mut out = String::new();
        loop {
            // Copy everything up to the next quote or backslash in one
            // piece; the delimiters are ASCII, so the run is always a
            // valid slice and multi-byte text passes through intact.
            let start = self.pos;
            while !matches!(self.peek_byte(), None | Some(b'"' | b'\\')) {
                self.pos += 1;
            }
            out.push_str(&self.text[start..self.pos]);
            match self.bump().ok_or(ParseError::MissingQuote)? {
                b'"' => return Ok(out),
                _ => {
                    let esc = self.bump().ok_or(ParseError::MissingQuote)?;
                    match esc {
                        b'a' => out.push('\x07'),
                        b'b' => out.push('\x08'),
                        b'f' => out.push('\x0c'),
                        b'n' => out.push('\n'),
                        b'r' => out.push('\r'),
                        b't' => out.push('\t'),
                        b'v' => out.push('\x0b'),
                        b'x' => {
                            let mut hex = String::new();
                            for _ in 0..2 {
                                match self.peek_byte() {
                                    Some(h) if h.is_ascii_hexdigit() => {
                                        hex.push(h as char);
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            if hex.is_empty() {
                                out.push('x');
                            } else {
                                let v =
                                    u8::from_str_radix(&hex, 16).unwrap();
                                if v == 0 {
                                    return Err(ParseError::BadEscape);
                                }
                                out.push(v as char);
                            }
                        }
                        c if c.is_ascii() => out.push(c as char),
                        _ => {
                            // A backslash before a multi-byte character
                            // keeps the whole character.
                            self.pos -= 1;
                            let ch = self.text[self.pos..]
                                .chars()
                                .next()
                                .ok_or(ParseError::MissingQuote)?;
                            out.push(ch);
                            self.pos += ch.len_utf8();
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub fn unescape_test_helper(quoted: &str) -> String {
    let mut lexer = Lexer::new(quoted);
    match lexer.next().unwrap().unwrap() {
        Tok::Str(s) => s,
        other => panic!("expected string literal, got {:?}", other),
    }
}
