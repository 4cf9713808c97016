//! Lexical scanner.
//!
//! A line-buffered reader feeds a small state machine, one character at a
//! time, with a single-character unread used whenever look-ahead terminates
//! a multi-character token. Identifiers are re-kinded against the reserved
//! keyword table after they are cut.

use std::io::BufRead;

use tracing::{debug, warn};

use crate::error::{CompileError, ErrorKind};
use crate::token::{keyword_kind, Token, TokenKind};

/// Longest lexeme delivered intact; longer ones are truncated with a warning.
pub const MAX_TOKEN_SIZE: usize = 256;

/// Line-buffered character source with one-character unread.
struct LineReader<R: BufRead> {
    input: R,
    line: Vec<char>,
    col: usize,
    lineno: usize,
    at_eof: bool,
}

impl<R: BufRead> LineReader<R> {
    fn new(input: R) -> Self {
        LineReader {
            input,
            line: Vec::new(),
            col: 0,
            lineno: 0,
            at_eof: false,
        }
    }

    /// Next character, refilling the line buffer as needed. `None` is
    /// end of input.
    fn read(&mut self) -> Result<Option<char>, CompileError> {
        if self.col >= self.line.len() {
            if self.at_eof {
                return Ok(None);
            }
            let mut buf = String::new();
            let n = self
                .input
                .read_line(&mut buf)
                .map_err(|e| CompileError::bare(ErrorKind::Abort, format!("read error: {}", e)))?;
            if n == 0 {
                self.at_eof = true;
                return Ok(None);
            }
            self.lineno += 1;
            self.line = buf.chars().collect();
            self.col = 0;
            debug!(line = self.lineno, "source line read");
        }
        let ch = self.line[self.col];
        self.col += 1;
        Ok(Some(ch))
    }

    /// Push the most recent character back. A single level is supported.
    fn unread(&mut self) {
        if !self.at_eof && self.col > 0 {
            self.col -= 1;
        }
    }

    fn lineno(&self) -> usize {
        self.lineno
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    InComment,
    InString,
    InChar,
    InUnsigned,
    InIdent,
    InLess,
    InGreater,
    InColon,
}

/// The tokenizer. Owns the character source; dropping the scanner closes it.
pub struct Scanner<R: BufRead> {
    reader: LineReader<R>,
}

impl<R: BufRead> Scanner<R> {
    pub fn new(input: R) -> Self {
        Scanner {
            reader: LineReader::new(input),
        }
    }

    /// Current line of the read cursor.
    pub fn lineno(&self) -> usize {
        self.reader.lineno()
    }

    /// Produce the next token and advance.
    pub fn next_token(&mut self) -> Result<Token, CompileError> {
        let mut lexeme = String::new();
        let mut truncated = false;
        let mut state = State::Start;

        let save = |lexeme: &mut String, truncated: &mut bool, ch: char| {
            if lexeme.chars().count() < MAX_TOKEN_SIZE {
                lexeme.push(ch);
            } else {
                *truncated = true;
            }
        };

        loop {
            let ch = self.reader.read()?;
            let kind = match state {
                State::Start => match ch {
                    None => Some(TokenKind::Endfile),
                    Some(c) if c.is_whitespace() => None,
                    Some(c) if c.is_ascii_digit() => {
                        save(&mut lexeme, &mut truncated, c);
                        state = State::InUnsigned;
                        None
                    }
                    Some(c) if c.is_ascii_alphabetic() => {
                        save(&mut lexeme, &mut truncated, c);
                        state = State::InIdent;
                        None
                    }
                    Some('"') => {
                        state = State::InString;
                        None
                    }
                    Some('\'') => {
                        state = State::InChar;
                        None
                    }
                    Some('{') => {
                        state = State::InComment;
                        None
                    }
                    Some(':') => {
                        save(&mut lexeme, &mut truncated, ':');
                        state = State::InColon;
                        None
                    }
                    Some('<') => {
                        save(&mut lexeme, &mut truncated, '<');
                        state = State::InLess;
                        None
                    }
                    Some('>') => {
                        save(&mut lexeme, &mut truncated, '>');
                        state = State::InGreater;
                        None
                    }
                    Some(c) => {
                        save(&mut lexeme, &mut truncated, c);
                        Some(match c {
                            '.' => TokenKind::Dot,
                            '+' => TokenKind::Plus,
                            '-' => TokenKind::Minus,
                            '*' => TokenKind::Star,
                            '/' => TokenKind::Slash,
                            '=' => TokenKind::Equ,
                            ',' => TokenKind::Comma,
                            ';' => TokenKind::Semi,
                            '(' => TokenKind::Lparen,
                            ')' => TokenKind::Rparen,
                            '[' => TokenKind::Lbracket,
                            ']' => TokenKind::Rbracket,
                            '}' => TokenKind::Rbrace,
                            _ => TokenKind::Error,
                        })
                    }
                },
                State::InComment => match ch {
                    None => Some(TokenKind::Endfile),
                    Some('}') => {
                        state = State::Start;
                        None
                    }
                    Some(_) => None,
                },
                State::InString => match ch {
                    Some('"') => Some(TokenKind::StringLit),
                    Some(c) if !c.is_control() => {
                        save(&mut lexeme, &mut truncated, c);
                        None
                    }
                    Some(_) => {
                        return Err(CompileError::new(
                            ErrorKind::BadToken,
                            self.reader.lineno(),
                            "unprintable character in string literal",
                        ));
                    }
                    None => {
                        lexeme.clear();
                        Some(TokenKind::Endfile)
                    }
                },
                State::InChar => match ch {
                    Some('\'') => Some(TokenKind::CharLit),
                    Some(c) if c.is_ascii_alphanumeric() => {
                        save(&mut lexeme, &mut truncated, c);
                        None
                    }
                    None => {
                        lexeme.clear();
                        Some(TokenKind::Endfile)
                    }
                    Some(_) => None,
                },
                State::InUnsigned => match ch {
                    Some(c) if c.is_ascii_digit() => {
                        save(&mut lexeme, &mut truncated, c);
                        None
                    }
                    other => {
                        if other.is_some() {
                            self.reader.unread();
                        }
                        Some(TokenKind::Unsigned)
                    }
                },
                State::InIdent => match ch {
                    Some(c) if c.is_ascii_alphanumeric() => {
                        save(&mut lexeme, &mut truncated, c);
                        None
                    }
                    other => {
                        if other.is_some() {
                            self.reader.unread();
                        }
                        Some(TokenKind::Ident)
                    }
                },
                State::InLess => match ch {
                    Some('=') => {
                        save(&mut lexeme, &mut truncated, '=');
                        Some(TokenKind::Leq)
                    }
                    Some('>') => {
                        save(&mut lexeme, &mut truncated, '>');
                        Some(TokenKind::Neq)
                    }
                    other => {
                        if other.is_some() {
                            self.reader.unread();
                        }
                        Some(TokenKind::Lst)
                    }
                },
                State::InGreater => match ch {
                    Some('=') => {
                        save(&mut lexeme, &mut truncated, '=');
                        Some(TokenKind::Geq)
                    }
                    other => {
                        if other.is_some() {
                            self.reader.unread();
                        }
                        Some(TokenKind::Gtt)
                    }
                },
                State::InColon => match ch {
                    Some('=') => {
                        save(&mut lexeme, &mut truncated, '=');
                        Some(TokenKind::Assign)
                    }
                    other => {
                        if other.is_some() {
                            self.reader.unread();
                        }
                        Some(TokenKind::Colon)
                    }
                },
            };

            if let Some(mut kind) = kind {
                if truncated {
                    warn!(
                        line = self.reader.lineno(),
                        "token longer than {} characters truncated", MAX_TOKEN_SIZE
                    );
                }
                if kind == TokenKind::Ident {
                    if let Some(kw) = keyword_kind(&lexeme) {
                        kind = kw;
                    }
                }
                let tok = Token::new(kind, lexeme, self.reader.lineno());
                debug!(kind = ?tok.kind, lexeme = %tok.lexeme, line = tok.line, "token");
                return Ok(tok);
            }
        }
    }
}
