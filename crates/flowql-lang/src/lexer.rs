//! Hand-rolled scanner over `&str` (spec §4.1).
//!
//! The lexer never hard-reserves keywords: it emits `TokenKind::Keyword`
//! when a bare word matches the keyword table, but leaves it to the parser
//! to demote that token back to an identifier wherever the grammar allows
//! it (property keys, member-access names, variable positions) — this is
//! the "context-sensitive reserved words" contract in spec §4.1, and
//! `Keyword::text()` is how the parser recovers the original spelling.

use flowql_core::error::{EngineError, Position};
use crate::token::{Keyword, Token, TokenKind};

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, EngineError> {
        let mut out = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.kind == TokenKind::Eof;
            out.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(out)
    }

    fn position(&self) -> Position {
        Position {
            offset: self.pos,
            line: self.line,
            column: self.col,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(b)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.advance();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, EngineError> {
        self.skip_trivia();
        let position = self.position();
        let Some(b) = self.peek() else {
            return Ok(Token { kind: TokenKind::Eof, position });
        };

        let kind = match b {
            b'|' => {
                self.advance();
                if self.peek() == Some(b'|') {
                    self.advance();
                    TokenKind::OrOr
                } else {
                    TokenKind::Pipe
                }
            }
            b'&' if self.peek_at(1) == Some(b'&') => {
                self.advance();
                self.advance();
                TokenKind::AndAnd
            }
            b'=' => {
                self.advance();
                match self.peek() {
                    Some(b'=') => {
                        self.advance();
                        TokenKind::EqEq
                    }
                    Some(b'>') => {
                        self.advance();
                        TokenKind::FatArrow
                    }
                    _ => TokenKind::Eq,
                }
            }
            b'!' if self.peek_at(1) == Some(b'=') => {
                self.advance();
                self.advance();
                TokenKind::NotEq
            }
            b'<' => {
                self.advance();
                if self.peek() == Some(b'=') {
                    self.advance();
                    TokenKind::LtEq
                } else {
                    TokenKind::Lt
                }
            }
            b'>' => {
                self.advance();
                if self.peek() == Some(b'=') {
                    self.advance();
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }
            b'+' => {
                self.advance();
                TokenKind::Plus
            }
            b'-' => {
                self.advance();
                TokenKind::Minus
            }
            b'*' => {
                self.advance();
                TokenKind::Star
            }
            b'/' => {
                self.advance();
                TokenKind::Slash
            }
            b'?' => {
                self.advance();
                TokenKind::Question
            }
            b':' => {
                self.advance();
                TokenKind::Colon
            }
            b'.' => {
                if self.peek_at(1) == Some(b'.') && self.peek_at(2) == Some(b'.') {
                    self.advance();
                    self.advance();
                    self.advance();
                    TokenKind::DotDotDot
                } else {
                    self.advance();
                    TokenKind::Dot
                }
            }
            b',' => {
                self.advance();
                TokenKind::Comma
            }
            b';' => {
                self.advance();
                TokenKind::Semicolon
            }
            b'(' => {
                self.advance();
                TokenKind::LParen
            }
            b')' => {
                self.advance();
                TokenKind::RParen
            }
            b'{' => {
                self.advance();
                TokenKind::LBrace
            }
            b'}' => {
                self.advance();
                TokenKind::RBrace
            }
            b'[' => {
                self.advance();
                TokenKind::LBracket
            }
            b']' => {
                self.advance();
                TokenKind::RBracket
            }
            b'"' | b'\'' => self.scan_string(b)?,
            b'0'..=b'9' => self.scan_number_or_duration()?,
            b if is_ident_start(b) => self.scan_ident_keyword_or_duration_unit(),
            other => {
                return Err(EngineError::Lex {
                    position,
                    message: format!("unexpected character '{}'", other as char),
                });
            }
        };
        Ok(Token { kind, position })
    }

    fn scan_string(&mut self, quote: u8) -> Result<TokenKind, EngineError> {
        let start_pos = self.position();
        self.advance(); // opening quote
        let mut s = String::new();
        loop {
            match self.advance() {
                None => {
                    return Err(EngineError::Lex {
                        position: start_pos,
                        message: "unterminated string literal".into(),
                    });
                }
                Some(b) if b == quote => break,
                Some(b'\\') => match self.advance() {
                    Some(b'n') => s.push('\n'),
                    Some(b't') => s.push('\t'),
                    Some(b'r') => s.push('\r'),
                    Some(b'\\') => s.push('\\'),
                    Some(b'"') => s.push('"'),
                    Some(b'\'') => s.push('\''),
                    Some(other) => s.push(other as char),
                    None => {
                        return Err(EngineError::Lex {
                            position: start_pos,
                            message: "unterminated escape sequence".into(),
                        });
                    }
                },
                Some(b) => {
                    // re-decode as utf8 by falling back to char boundary scanning
                    if b < 0x80 {
                        s.push(b as char);
                    } else {
                        // collect the full utf8 char: step back and read from src
                        let start = self.pos - 1;
                        let ch = self.src[start..].chars().next().unwrap();
                        for _ in 1..ch.len_utf8() {
                            self.advance();
                        }
                        s.push(ch);
                    }
                }
            }
        }
        Ok(TokenKind::String(s))
    }

    fn scan_number_or_duration(&mut self) -> Result<TokenKind, EngineError> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.advance();
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(b'0'..=b'9')) {
            is_float = true;
            self.advance();
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.advance();
            }
        }
        let digits = &self.src[start..self.pos];

        if !is_float {
            if let Some(unit) = self.try_scan_duration_unit() {
                let amount: u64 = digits.parse().map_err(|_| EngineError::Lex {
                    position: self.position(),
                    message: format!("invalid duration amount '{digits}'"),
                })?;
                return Ok(TokenKind::Duration(amount, unit));
            }
        }

        let n: f64 = digits.parse().map_err(|_| EngineError::Lex {
            position: self.position(),
            message: format!("invalid number literal '{digits}'"),
        })?;
        Ok(TokenKind::Number(n))
    }

    /// Tries to consume one of the duration unit suffixes directly
    /// following a numeric literal with no whitespace, only when the
    /// following character is not itself an identifier continuation (so
    /// `5seconds` does not get split into `5s` + `econds`).
    fn try_scan_duration_unit(&mut self) -> Option<String> {
        for unit in flowql_core::duration::UNITS {
            let len_bytes = unit.len();
            if self.src[self.pos..].starts_with(unit) {
                let after = self.pos + len_bytes;
                let next_is_ident = self.src[after..]
                    .chars()
                    .next()
                    .map(is_ident_continue_char)
                    .unwrap_or(false);
                if !next_is_ident {
                    for _ in 0..unit.chars().count() {
                        self.advance();
                    }
                    return Some((*unit).to_string());
                }
            }
        }
        None
    }

    fn scan_ident_keyword_or_duration_unit(&mut self) -> TokenKind {
        let start = self.pos;
        while self.peek().map(|b| is_ident_continue(b)).unwrap_or(false) {
            self.advance();
        }
        let text = &self.src[start..self.pos];
        match Keyword::lookup(text) {
            Some(k) => TokenKind::Keyword(k),
            None => TokenKind::Ident(text.to_string()),
        }
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_ident_continue_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
