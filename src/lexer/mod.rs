use std::borrow::Cow;

use crate::error::{Error, ErrorKind, Result};
use crate::interrupt::named_signal;
use crate::lexer::cursor::Cursor;
use crate::span::{Idx, Span};

pub mod cursor;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    /// Mnemonic, operand, label, directive or variable name.
    Word,
    /// Double-quoted string, stored unescaped and without quotes.
    Str,
    /// Single-quoted character, stored unescaped and without quotes.
    Char,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

impl Token {
    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text == word
    }
}

/// Tokens of one non-empty source line.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Line {
    /// 1-based
    pub number: usize,
    pub tokens: Vec<Token>,
}

/// Test if a character separates tokens.
pub(crate) fn is_whitespace(c: char) -> bool {
    // Commas are essentially whitespace
    matches!(c, ' ' | '\t' | '\r' | ',')
}

fn ends_word(c: char) -> bool {
    is_whitespace(c) || matches!(c, '\n' | ';' | '"')
}

/// Split source into lines of tokens, dropping comments and blank lines.
pub fn tokenize(src: &str) -> Result<Vec<Line>> {
    let mut cursor = Cursor::new(src);
    let mut lines = Vec::new();
    let mut current = Line {
        number: 1,
        tokens: Vec::new(),
    };

    while !cursor.is_eof() {
        let start = cursor.offset();
        cursor.reset_pos_within_token();
        let kind = match cursor.first() {
            '\n' => {
                cursor.bump();
                let number = current.number + 1;
                let line = std::mem::replace(
                    &mut current,
                    Line {
                        number,
                        tokens: Vec::new(),
                    },
                );
                if !line.tokens.is_empty() {
                    lines.push(line);
                }
                continue;
            }
            c if is_whitespace(c) => {
                cursor.bump();
                continue;
            }
            ';' => {
                cursor.take_while(|c| c != '\n');
                continue;
            }
            quote @ ('"' | '\'') => {
                cursor.bump();
                let mut escaped = false;
                let mut terminated = false;
                // Literals never span lines
                while !cursor.is_eof() && cursor.first() != '\n' {
                    let Some(c) = cursor.bump() else { break };
                    if c == quote && !escaped {
                        terminated = true;
                        break;
                    }
                    escaped = c == '\\' && !escaped;
                }
                let span = Span::new(Idx(start as u32), cursor.pos_within_token() as u16);
                if !terminated {
                    return Err(Error::new(
                        ErrorKind::UnterminatedString,
                        "Encountered an unterminated literal",
                    )
                    .with_line(current.number)
                    .with_span(span));
                }
                if quote == '"' {
                    TokenKind::Str
                } else {
                    TokenKind::Char
                }
            }
            _ => {
                cursor.take_while(|c| !ends_word(c));
                TokenKind::Word
            }
        };

        let len = cursor.pos_within_token() as usize;
        let raw = &src[start..start + len];
        let text = match kind {
            TokenKind::Word => raw.to_string(),
            // Strip quotes
            TokenKind::Str | TokenKind::Char => unescape(&raw[1..raw.len() - 1]).into_owned(),
        };
        current.tokens.push(Token {
            kind,
            text,
            span: Span::new(Idx(start as u32), len as u16),
        });
    }
    if !current.tokens.is_empty() {
        lines.push(current);
    }
    Ok(lines)
}

/// Tokenize and rewrite literal shorthands into canonical operand form.
///
/// - `0x1F` -> `$31`
/// - `'a'` -> `$97`
/// - `[0x10]`, `[16]` -> `&16`
/// - `$0x10`, `&0x10`, `*0x10` -> decimal with the same prefix
/// - named signals such as `INT_FILE` -> their immediate value
pub fn preprocess(src: &str) -> Result<Vec<Line>> {
    let mut lines = tokenize(src)?;
    for line in &mut lines {
        for token in &mut line.tokens {
            canonicalize(token).map_err(|e| e.with_line(line.number).with_span(token.span))?;
        }
    }
    Ok(lines)
}

fn canonicalize(token: &mut Token) -> Result<()> {
    match token.kind {
        TokenKind::Str => Ok(()),
        TokenKind::Char => {
            let mut chars = token.text.chars();
            let value = match (chars.next(), chars.next()) {
                (Some(ch), None) if (ch as u32) <= 0xFF => ch as u32,
                _ => {
                    return Err(Error::new(
                        ErrorKind::InvalidLiteral,
                        format!("Character literal '{}' must be a single byte", token.text),
                    ))
                }
            };
            token.kind = TokenKind::Word;
            token.text = format!("${}", value);
            Ok(())
        }
        TokenKind::Word => {
            if let Some(rewritten) = rewrite_word(&token.text)? {
                token.text = rewritten;
            }
            Ok(())
        }
    }
}

fn rewrite_word(word: &str) -> Result<Option<String>> {
    if is_hex(word) {
        return Ok(Some(format!("${}", expect_int(word)?)));
    }
    if let Some(inner) = word.strip_prefix('[').and_then(|w| w.strip_suffix(']')) {
        return Ok(Some(format!("&{}", expect_int(inner)?)));
    }
    let mut chars = word.chars();
    if let Some(prefix @ ('$' | '&' | '*')) = chars.next() {
        let rest = chars.as_str();
        if is_hex(rest) {
            return Ok(Some(format!("{}{}", prefix, expect_int(rest)?)));
        }
        return Ok(None);
    }
    Ok(named_signal(word).map(|value| format!("${}", value)))
}

fn is_hex(word: &str) -> bool {
    word.starts_with("0x") || word.starts_with("0X")
}

fn expect_int(text: &str) -> Result<u32> {
    parse_int(text).ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidLiteral,
            format!("Encountered an invalid literal `{}`", text),
        )
    })
}

/// Decimal or `0x`-prefixed hexadecimal.
pub fn parse_int(text: &str) -> Option<u32> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
        text.parse().ok()
    } else {
        None
    }
}

fn unescape(s: &str) -> Cow<str> {
    if !s.contains('\\') {
        return Cow::Borrowed(s);
    }
    let mut result = String::new();
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('t') => result.push('\t'),
                Some('r') => result.push('\r'),
                Some('0') => result.push('\0'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some('\'') => result.push('\''),
                Some(c) => {
                    result.push('\\');
                    result.push(c);
                }
                // Trailing backslash; include it as is
                None => result.push('\\'),
            }
        } else {
            result.push(c);
        }
    }
    Cow::Owned(result)
}
