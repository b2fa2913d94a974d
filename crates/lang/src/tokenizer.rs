// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Indentation-aware tokenizer.
//!
//! Layout rules: leading spaces on a non-blank line are compared against an
//! indent stack (tabs count as 2 spaces); blank and comment-only lines emit
//! no layout tokens; inside any open bracket layout is suppressed entirely.

use crate::token::{Location, Token, TokenKind, KEYWORDS};
use thiserror::Error;

/// Errors from the tokenizer.
#[derive(Debug, Error)]
pub enum LexError {
    #[error("tokenize error at {location}: {message}")]
    Tokenize { message: String, location: Location },

    #[error("indentation error at {location}: unindent to {found} does not match any outer level (expected {expected})")]
    Indentation {
        found: usize,
        expected: usize,
        location: Location,
    },
}

/// Tokenize a full spell source into a token stream terminated by `Eof`.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Tokenizer::new(source).run()
}

struct Tokenizer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    tokens: Vec<Token>,
    indent_stack: Vec<usize>,
    bracket_depth: usize,
    at_line_start: bool,
}

impl Tokenizer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
            indent_stack: vec![0],
            bracket_depth: 0,
            at_line_start: true,
        }
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        while self.pos < self.chars.len() {
            if self.at_line_start && self.bracket_depth == 0 {
                self.handle_line_start()?;
                continue;
            }
            let c = self.peek();
            match c {
                '\n' => {
                    if self.bracket_depth == 0 {
                        self.push(TokenKind::Newline);
                        self.at_line_start = true;
                    }
                    self.advance_newline();
                }
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                '#' => self.skip_comment(),
                '"' | '\'' => self.lex_string(c)?,
                '0'..='9' => self.lex_number()?,
                '@' => self.lex_venue_ref()?,
                '*' => {
                    if self.peek_at(1) == Some('*') {
                        self.lex_advisory()?;
                    } else {
                        let loc = self.location();
                        self.advance();
                        self.tokens
                            .push(Token::new(TokenKind::Operator("*".into()), loc));
                    }
                }
                c if c.is_ascii_alphabetic() || c == '_' => self.lex_word(),
                _ => self.lex_operator()?,
            }
        }

        // Close the final line and unwind remaining indentation.
        if !self.at_line_start {
            self.push(TokenKind::Newline);
        }
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.push(TokenKind::Dedent);
        }
        self.push(TokenKind::Eof);
        Ok(self.tokens)
    }

    // -- line layout --

    fn handle_line_start(&mut self) -> Result<(), LexError> {
        let mut indent = 0usize;
        while let Some(c) = self.peek_opt() {
            match c {
                ' ' => {
                    indent += 1;
                    self.advance();
                }
                '\t' => {
                    indent += 2;
                    self.advance();
                }
                _ => break,
            }
        }
        match self.peek_opt() {
            None => return Ok(()),
            // Blank and comment-only lines never touch the indent stack.
            Some('\n') => {
                self.advance_newline();
                return Ok(());
            }
            Some('\r') => {
                self.advance();
                return Ok(());
            }
            Some('#') => {
                self.skip_comment();
                return Ok(());
            }
            Some(_) => {}
        }

        let location = self.location();
        let current = *self.indent_stack.last().unwrap_or(&0);
        if indent > current {
            self.indent_stack.push(indent);
            self.tokens.push(Token::new(TokenKind::Indent, location));
        } else if indent < current {
            while *self.indent_stack.last().unwrap_or(&0) > indent {
                self.indent_stack.pop();
                self.tokens.push(Token::new(TokenKind::Dedent, location));
            }
            let landed = *self.indent_stack.last().unwrap_or(&0);
            if landed != indent {
                return Err(LexError::Indentation {
                    found: indent,
                    expected: landed,
                    location,
                });
            }
        }
        self.at_line_start = false;
        Ok(())
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek_opt() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
        // Consume the newline only when the whole line was a comment;
        // trailing comments leave it for the main loop so NEWLINE is emitted.
        if self.at_line_start && self.peek_opt() == Some('\n') {
            self.advance_newline();
        }
    }

    // -- literals --

    fn lex_string(&mut self, quote: char) -> Result<(), LexError> {
        let location = self.location();
        self.advance(); // opening quote
        let mut out = String::new();
        loop {
            match self.peek_opt() {
                None => {
                    return Err(LexError::Tokenize {
                        message: "unterminated string".into(),
                        location,
                    })
                }
                Some('\n') => {
                    return Err(LexError::Tokenize {
                        message: "newline in string literal".into(),
                        location,
                    })
                }
                Some('\\') => {
                    self.advance();
                    let escaped = self.peek_opt().ok_or(LexError::Tokenize {
                        message: "unterminated escape".into(),
                        location,
                    })?;
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                    self.advance();
                }
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some(c) => {
                    out.push(c);
                    self.advance();
                }
            }
        }
        self.tokens.push(Token::new(TokenKind::Str(out), location));
        Ok(())
    }

    fn lex_number(&mut self) -> Result<(), LexError> {
        let location = self.location();

        // 0x-prefixed hex is an address literal.
        if self.peek() == '0' && self.peek_at(1) == Some('x') && self.hex_follows(2) {
            let mut addr = String::from("0x");
            self.advance();
            self.advance();
            while let Some(c) = self.peek_opt() {
                if c.is_ascii_hexdigit() {
                    addr.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            self.tokens
                .push(Token::new(TokenKind::Address(addr), location));
            return Ok(());
        }

        let mut text = String::new();
        while let Some(c) = self.peek_opt() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if self.peek_opt() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.advance();
            while let Some(c) = self.peek_opt() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        let value: f64 = text.parse().map_err(|_| LexError::Tokenize {
            message: format!("invalid number '{text}'"),
            location,
        })?;

        // Trailing % makes a percentage; a lone duration suffix scales to
        // seconds. A suffix followed by identifier chars is a unit symbol
        // and belongs to the parser.
        match self.peek_opt() {
            Some('%') => {
                self.advance();
                self.tokens
                    .push(Token::new(TokenKind::Percentage(value / 100.0), location));
            }
            Some(c @ ('s' | 'm' | 'h' | 'd')) if !self.ident_char_at(1) => {
                self.advance();
                let seconds = match c {
                    's' => value,
                    'm' => value * 60.0,
                    'h' => value * 3600.0,
                    _ => value * 86400.0,
                };
                self.tokens
                    .push(Token::new(TokenKind::Number(seconds), location));
            }
            _ => {
                self.tokens
                    .push(Token::new(TokenKind::Number(value), location));
            }
        }
        Ok(())
    }

    fn lex_venue_ref(&mut self) -> Result<(), LexError> {
        let location = self.location();
        self.advance(); // @
        let mut name = String::new();
        while let Some(c) = self.peek_opt() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err(LexError::Tokenize {
                message: "expected venue name after '@'".into(),
                location,
            });
        }
        self.tokens
            .push(Token::new(TokenKind::VenueRef(name), location));
        Ok(())
    }

    fn lex_advisory(&mut self) -> Result<(), LexError> {
        let location = self.location();
        self.advance();
        self.advance(); // **
        let mut text = String::new();
        loop {
            match self.peek_opt() {
                None | Some('\n') => {
                    return Err(LexError::Tokenize {
                        message: "unterminated advisory (missing closing '**')".into(),
                        location,
                    })
                }
                Some('*') if self.peek_at(1) == Some('*') => {
                    self.advance();
                    self.advance();
                    break;
                }
                Some(c) => {
                    text.push(c);
                    self.advance();
                }
            }
        }
        self.tokens.push(Token::new(
            TokenKind::Advisory(text.trim().to_string()),
            location,
        ));
        Ok(())
    }

    fn lex_word(&mut self) {
        let location = self.location();
        let mut word = String::new();
        while let Some(c) = self.peek_opt() {
            if c.is_ascii_alphanumeric() || c == '_' {
                word.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let kind = if word == "true" {
            TokenKind::Bool(true)
        } else if word == "false" {
            TokenKind::Bool(false)
        } else if KEYWORDS.contains(&word.as_str()) {
            TokenKind::Keyword(word)
        } else {
            TokenKind::Identifier(word)
        };
        self.tokens.push(Token::new(kind, location));
    }

    fn lex_operator(&mut self) -> Result<(), LexError> {
        let location = self.location();
        let c = self.peek();
        // Two-character comparison operators first.
        if matches!(c, '=' | '!' | '<' | '>') && self.peek_at(1) == Some('=') {
            let op = format!("{c}=");
            self.advance();
            self.advance();
            self.tokens.push(Token::new(TokenKind::Operator(op), location));
            return Ok(());
        }
        if c == '!' {
            return Err(LexError::Tokenize {
                message: "unexpected character '!' (use 'not')".into(),
                location,
            });
        }
        let kind = {
            match c {
                '=' => TokenKind::Assign,
                '+' | '-' | '/' | '%' | '<' | '>' | '|' => TokenKind::Operator(c.to_string()),
                '?' => TokenKind::Question,
                ':' => TokenKind::Colon,
                ',' => TokenKind::Comma,
                '.' => TokenKind::Dot,
                '(' => {
                    self.bracket_depth += 1;
                    TokenKind::LParen
                }
                ')' => {
                    self.bracket_depth = self.bracket_depth.saturating_sub(1);
                    TokenKind::RParen
                }
                '[' => {
                    self.bracket_depth += 1;
                    TokenKind::LBracket
                }
                ']' => {
                    self.bracket_depth = self.bracket_depth.saturating_sub(1);
                    TokenKind::RBracket
                }
                '{' => {
                    self.bracket_depth += 1;
                    TokenKind::LBrace
                }
                '}' => {
                    self.bracket_depth = self.bracket_depth.saturating_sub(1);
                    TokenKind::RBrace
                }
                other => {
                    return Err(LexError::Tokenize {
                        message: format!("unexpected character '{other}'"),
                        location,
                    })
                }
            }
        };
        self.advance();
        self.tokens.push(Token::new(kind, location));
        Ok(())
    }

    // -- cursor helpers --

    fn peek(&self) -> char {
        self.chars[self.pos]
    }

    fn peek_opt(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn hex_follows(&self, ahead: usize) -> bool {
        self.peek_at(ahead).is_some_and(|c| c.is_ascii_hexdigit())
    }

    fn ident_char_at(&self, ahead: usize) -> bool {
        self.peek_at(ahead)
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    fn advance(&mut self) {
        self.pos += 1;
        self.column += 1;
    }

    fn advance_newline(&mut self) {
        self.pos += 1;
        self.line += 1;
        self.column = 1;
    }

    fn location(&self) -> Location {
        Location::new(self.line, self.column, self.pos as u32)
    }

    fn push(&mut self, kind: TokenKind) {
        let location = self.location();
        self.tokens.push(Token::new(kind, location));
    }
}

#[cfg(test)]
#[path = "tokenizer_tests.rs"]
mod tests;
