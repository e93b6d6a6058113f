//! Tokenizer for Lua 5.4 source.
//!
//! Scans raw bytes (Lua source is a byte sequence, not UTF-8 text) and
//! produces a flat token vector with line numbers. Long strings and long
//! comments support arbitrary bracket levels; numeric literals are split into
//! integer and float tokens here so the parser never re-parses digits.

use crate::error::{LuaError, LuaResult};
use phf::phf_map;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Keywords
    And,
    Break,
    Do,
    Else,
    Elseif,
    End,
    False,
    For,
    Function,
    Goto,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,
    // Symbols
    Semicolon,
    Assign,
    Comma,
    Dot,
    Colon,
    DoubleColon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Caret,
    Percent,
    Ampersand,
    Tilde,
    Pipe,
    Shr,
    Shl,
    Concat,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
    Hash,
    Ellipsis,
    // Values
    Identifier(String),
    Int(i64),
    Number(f64),
    Str(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

pub const KEYWORDS: phf::Map<&str, TokenKind> = phf_map! {
    "and" => TokenKind::And,
    "break" => TokenKind::Break,
    "do" => TokenKind::Do,
    "else" => TokenKind::Else,
    "elseif" => TokenKind::Elseif,
    "end" => TokenKind::End,
    "false" => TokenKind::False,
    "for" => TokenKind::For,
    "function" => TokenKind::Function,
    "goto" => TokenKind::Goto,
    "if" => TokenKind::If,
    "in" => TokenKind::In,
    "local" => TokenKind::Local,
    "nil" => TokenKind::Nil,
    "not" => TokenKind::Not,
    "or" => TokenKind::Or,
    "repeat" => TokenKind::Repeat,
    "return" => TokenKind::Return,
    "then" => TokenKind::Then,
    "true" => TokenKind::True,
    "until" => TokenKind::Until,
    "while" => TokenKind::While,
};

pub const SYMBOLS: phf::Map<&str, TokenKind> = phf_map! {
    ";" => TokenKind::Semicolon,
    "=" => TokenKind::Assign,
    "," => TokenKind::Comma,
    "." => TokenKind::Dot,
    ":" => TokenKind::Colon,
    "::" => TokenKind::DoubleColon,
    "(" => TokenKind::LParen,
    ")" => TokenKind::RParen,
    "[" => TokenKind::LBracket,
    "]" => TokenKind::RBracket,
    "{" => TokenKind::LBrace,
    "}" => TokenKind::RBrace,
    "+" => TokenKind::Plus,
    "-" => TokenKind::Minus,
    "*" => TokenKind::Star,
    "/" => TokenKind::Slash,
    "//" => TokenKind::DoubleSlash,
    "^" => TokenKind::Caret,
    "%" => TokenKind::Percent,
    "&" => TokenKind::Ampersand,
    "~" => TokenKind::Tilde,
    "|" => TokenKind::Pipe,
    ">>" => TokenKind::Shr,
    "<<" => TokenKind::Shl,
    ".." => TokenKind::Concat,
    "<" => TokenKind::Lt,
    "<=" => TokenKind::Lte,
    ">" => TokenKind::Gt,
    ">=" => TokenKind::Gte,
    "==" => TokenKind::Eq,
    "~=" => TokenKind::Neq,
    "#" => TokenKind::Hash,
    "..." => TokenKind::Ellipsis,
};

// Longest first so ">>" wins over ">" and "..." over "..".
const SYMBOL_ORDER: &[&str] = &[
    "...", "::", "//", ">>", "<<", "..", "<=", ">=", "==", "~=", ";", "=", ",", ".", ":", "(", ")",
    "[", "]", "{", "}", "+", "-", "*", "/", "^", "%", "&", "~", "|", "<", ">", "#",
];

pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
    line: u32,
    chunk: String,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a [u8], chunk: &str) -> Self {
        // A shebang line is allowed at the very top of a chunk.
        let mut lexer = Lexer {
            input,
            pos: 0,
            line: 1,
            chunk: chunk.to_string(),
        };
        if input.starts_with(b"#") {
            while let Some(c) = lexer.peek() {
                if c == b'\n' {
                    break;
                }
                lexer.pos += 1;
            }
        }
        lexer
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn consume(&mut self) -> Option<u8> {
        let c = self.peek();
        if let Some(ch) = c {
            if ch == b'\n' {
                self.line += 1;
            }
            self.pos += 1;
        }
        c
    }

    fn error(&self, message: impl Into<String>) -> LuaError {
        LuaError::syntax(message, &self.chunk, self.line)
    }

    fn is_whitespace(c: u8) -> bool {
        matches!(c, b' ' | b'\t' | b'\n' | b'\r' | b'\x0b' | b'\x0c')
    }

    fn is_digit(c: u8) -> bool {
        c.is_ascii_digit()
    }

    fn is_name_start(c: u8) -> bool {
        c.is_ascii_alphabetic() || c == b'_'
    }

    fn is_name_char(c: u8) -> bool {
        c.is_ascii_alphanumeric() || c == b'_'
    }

    fn skip_whitespace_and_comments(&mut self) -> LuaResult<()> {
        loop {
            match self.peek() {
                Some(c) if Self::is_whitespace(c) => {
                    self.consume();
                }
                Some(b'-') if self.peek_at(1) == Some(b'-') => {
                    self.pos += 2;
                    // Long comment: --[=*[ ... ]=*]
                    if self.peek() == Some(b'[') {
                        if let Some(level) = self.long_bracket_level() {
                            self.read_long_string(level)?;
                            continue;
                        }
                    }
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Checks for `[` `=`* `[` at the current position, returning the level
    /// without consuming anything on mismatch.
    fn long_bracket_level(&self) -> Option<usize> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mut level = 0;
        while self.peek_at(1 + level) == Some(b'=') {
            level += 1;
        }
        if self.peek_at(1 + level) == Some(b'[') {
            Some(level)
        } else {
            None
        }
    }

    /// Reads a `[=*[ ... ]=*]` body; the opening bracket must be verified
    /// first via `long_bracket_level`.
    fn read_long_string(&mut self, level: usize) -> LuaResult<Vec<u8>> {
        self.pos += 2 + level;
        // A newline immediately after the opening bracket is dropped.
        if self.peek() == Some(b'\r') {
            self.consume();
            if self.peek() == Some(b'\n') {
                self.consume();
            }
        } else if self.peek() == Some(b'\n') {
            self.consume();
        }
        let mut content = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unfinished long string")),
                Some(b']') => {
                    let mut eqs = 0;
                    while self.peek_at(1 + eqs) == Some(b'=') {
                        eqs += 1;
                    }
                    if eqs == level && self.peek_at(1 + eqs) == Some(b']') {
                        self.pos += 2 + level;
                        return Ok(content);
                    }
                    content.push(b']');
                    self.pos += 1;
                }
                Some(c) => {
                    content.push(c);
                    self.consume();
                }
            }
        }
    }

    fn read_short_string(&mut self, quote: u8) -> LuaResult<Vec<u8>> {
        self.pos += 1;
        let mut content = Vec::new();
        loop {
            match self.peek() {
                None | Some(b'\n') => return Err(self.error("unfinished string")),
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(content);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        None => return Err(self.error("unfinished string")),
                        Some(b'n') => {
                            content.push(b'\n');
                            self.pos += 1;
                        }
                        Some(b't') => {
                            content.push(b'\t');
                            self.pos += 1;
                        }
                        Some(b'r') => {
                            content.push(b'\r');
                            self.pos += 1;
                        }
                        Some(b'a') => {
                            content.push(0x07);
                            self.pos += 1;
                        }
                        Some(b'b') => {
                            content.push(0x08);
                            self.pos += 1;
                        }
                        Some(b'f') => {
                            content.push(0x0c);
                            self.pos += 1;
                        }
                        Some(b'v') => {
                            content.push(0x0b);
                            self.pos += 1;
                        }
                        Some(b'\\') => {
                            content.push(b'\\');
                            self.pos += 1;
                        }
                        Some(b'"') => {
                            content.push(b'"');
                            self.pos += 1;
                        }
                        Some(b'\'') => {
                            content.push(b'\'');
                            self.pos += 1;
                        }
                        Some(b'\n') => {
                            content.push(b'\n');
                            self.consume();
                        }
                        Some(b'x') => {
                            self.pos += 1;
                            let mut v: u32 = 0;
                            let mut n = 0;
                            while n < 2 {
                                match self.peek().and_then(hex_digit) {
                                    Some(d) => {
                                        v = v * 16 + d;
                                        self.pos += 1;
                                        n += 1;
                                    }
                                    None => break,
                                }
                            }
                            if n == 0 {
                                return Err(self.error("hexadecimal digit expected"));
                            }
                            content.push(v as u8);
                        }
                        Some(b'z') => {
                            self.pos += 1;
                            while let Some(c) = self.peek() {
                                if Self::is_whitespace(c) {
                                    self.consume();
                                } else {
                                    break;
                                }
                            }
                        }
                        Some(b'u') => {
                            self.pos += 1;
                            if self.peek() != Some(b'{') {
                                return Err(self.error("missing '{' in \\u{xxxx}"));
                            }
                            self.pos += 1;
                            let mut v: u32 = 0;
                            let mut n = 0;
                            while let Some(d) = self.peek().and_then(hex_digit) {
                                v = v.saturating_mul(16).saturating_add(d);
                                self.pos += 1;
                                n += 1;
                            }
                            if n == 0 {
                                return Err(self.error("hexadecimal digit expected"));
                            }
                            if self.peek() != Some(b'}') {
                                return Err(self.error("missing '}' in \\u{xxxx}"));
                            }
                            self.pos += 1;
                            match char::from_u32(v) {
                                Some(ch) => {
                                    let mut buf = [0u8; 4];
                                    content.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                                }
                                None => return Err(self.error("UTF-8 value too large")),
                            }
                        }
                        Some(c) if Self::is_digit(c) => {
                            let mut v: u32 = 0;
                            let mut n = 0;
                            while n < 3 {
                                match self.peek() {
                                    Some(d) if Self::is_digit(d) => {
                                        v = v * 10 + (d - b'0') as u32;
                                        self.pos += 1;
                                        n += 1;
                                    }
                                    _ => break,
                                }
                            }
                            if v > 255 {
                                return Err(self.error("decimal escape too large"));
                            }
                            content.push(v as u8);
                        }
                        Some(c) => {
                            return Err(self.error(format!(
                                "invalid escape sequence '\\{}'",
                                c as char
                            )))
                        }
                    }
                }
                Some(c) => {
                    content.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn read_number(&mut self) -> LuaResult<TokenKind> {
        let start = self.pos;
        if self.peek() == Some(b'0')
            && matches!(self.peek_at(1), Some(b'x') | Some(b'X'))
        {
            self.pos += 2;
            return self.read_hex_number();
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if Self::is_digit(c) {
                self.pos += 1;
            } else if c == b'.' && !is_float {
                // ".." after digits is the concat operator, not a decimal point
                if self.peek_at(1) == Some(b'.') {
                    break;
                }
                is_float = true;
                self.pos += 1;
            } else if matches!(c, b'e' | b'E') {
                is_float = true;
                self.pos += 1;
                if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                    self.pos += 1;
                }
                let mut any = false;
                while let Some(d) = self.peek() {
                    if Self::is_digit(d) {
                        self.pos += 1;
                        any = true;
                    } else {
                        break;
                    }
                }
                if !any {
                    return Err(self.error("malformed number"));
                }
                break;
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("malformed number"))?;
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Number)
                .map_err(|_| self.error("malformed number"))
        } else {
            // A decimal integer too large for i64 degrades to a float.
            match text.parse::<i64>() {
                Ok(i) => Ok(TokenKind::Int(i)),
                Err(_) => text
                    .parse::<f64>()
                    .map(TokenKind::Number)
                    .map_err(|_| self.error("malformed number")),
            }
        }
    }

    fn read_hex_number(&mut self) -> LuaResult<TokenKind> {
        let mut int_val: u64 = 0;
        let mut float_val: f64 = 0.0;
        let mut any = false;
        let mut is_float = false;
        let mut exponent: i32 = 0;
        while let Some(d) = self.peek().and_then(hex_digit) {
            // Hexadecimal integer literals wrap around modulo 2^64.
            int_val = int_val.wrapping_mul(16).wrapping_add(d as u64);
            float_val = float_val * 16.0 + d as f64;
            self.pos += 1;
            any = true;
        }
        if self.peek() == Some(b'.') {
            is_float = true;
            self.pos += 1;
            while let Some(d) = self.peek().and_then(hex_digit) {
                float_val = float_val * 16.0 + d as f64;
                exponent -= 4;
                self.pos += 1;
                any = true;
            }
        }
        if !any {
            return Err(self.error("malformed number"));
        }
        if matches!(self.peek(), Some(b'p') | Some(b'P')) {
            is_float = true;
            self.pos += 1;
            let negative = match self.peek() {
                Some(b'-') => {
                    self.pos += 1;
                    true
                }
                Some(b'+') => {
                    self.pos += 1;
                    false
                }
                _ => false,
            };
            let mut e: i32 = 0;
            let mut any_exp = false;
            while let Some(d) = self.peek() {
                if Self::is_digit(d) {
                    e = e.saturating_mul(10).saturating_add((d - b'0') as i32);
                    self.pos += 1;
                    any_exp = true;
                } else {
                    break;
                }
            }
            if !any_exp {
                return Err(self.error("malformed number"));
            }
            exponent += if negative { -e } else { e };
        }
        if is_float {
            Ok(TokenKind::Number(float_val * (exponent as f64).exp2()))
        } else {
            Ok(TokenKind::Int(int_val as i64))
        }
    }

    fn next_token(&mut self) -> LuaResult<Option<Token>> {
        self.skip_whitespace_and_comments()?;
        let line = self.line;
        let c = match self.peek() {
            None => return Ok(None),
            Some(c) => c,
        };

        // Long string literal
        if c == b'[' {
            if let Some(level) = self.long_bracket_level() {
                let content = self.read_long_string(level)?;
                return Ok(Some(Token {
                    kind: TokenKind::Str(content),
                    line,
                }));
            }
        }

        if c == b'"' || c == b'\'' {
            let content = self.read_short_string(c)?;
            return Ok(Some(Token {
                kind: TokenKind::Str(content),
                line,
            }));
        }

        if Self::is_digit(c) || (c == b'.' && self.peek_at(1).is_some_and(Self::is_digit)) {
            let kind = self.read_number()?;
            return Ok(Some(Token { kind, line }));
        }

        if Self::is_name_start(c) {
            let start = self.pos;
            while let Some(c) = self.peek() {
                if Self::is_name_char(c) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            let name = std::str::from_utf8(&self.input[start..self.pos])
                .map_err(|_| self.error("invalid identifier"))?;
            let kind = KEYWORDS
                .get(name)
                .cloned()
                .unwrap_or_else(|| TokenKind::Identifier(name.to_string()));
            return Ok(Some(Token { kind, line }));
        }

        for sym in SYMBOL_ORDER {
            if self.input[self.pos..].starts_with(sym.as_bytes()) {
                self.pos += sym.len();
                let kind = SYMBOLS.get(sym).cloned().expect("symbol table entry");
                return Ok(Some(Token { kind, line }));
            }
        }

        Err(self.error(format!("unexpected symbol near '{}'", c as char)))
    }
}

/// Tokenizes a full chunk. `chunk` names the source in error messages.
pub fn tokenize(input: &[u8], chunk: &str) -> LuaResult<Vec<Token>> {
    let mut lexer = Lexer::new(input, chunk);
    let mut tokens = Vec::new();
    while let Some(tok) = lexer.next_token()? {
        tokens.push(tok);
    }
    Ok(tokens)
}

fn hex_digit(c: u8) -> Option<u32> {
    match c {
        b'0'..=b'9' => Some((c - b'0') as u32),
        b'a'..=b'f' => Some((c - b'a' + 10) as u32),
        b'A'..=b'F' => Some((c - b'A' + 10) as u32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src.as_bytes(), "test")
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("local x = nil"),
            vec![
                TokenKind::Local,
                TokenKind::Identifier("x".to_string()),
                TokenKind::Assign,
                TokenKind::Nil,
            ]
        );
    }

    #[test]
    fn test_integer_and_float_literals() {
        assert_eq!(kinds("42"), vec![TokenKind::Int(42)]);
        assert_eq!(kinds("3.5"), vec![TokenKind::Number(3.5)]);
        assert_eq!(kinds("1e2"), vec![TokenKind::Number(100.0)]);
        assert_eq!(kinds("0xff"), vec![TokenKind::Int(255)]);
        assert_eq!(kinds("0x1p4"), vec![TokenKind::Number(16.0)]);
    }

    #[test]
    fn test_integer_dot_dot_is_concat() {
        assert_eq!(
            kinds("1 ..2"),
            vec![TokenKind::Int(1), TokenKind::Concat, TokenKind::Int(2)]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\nb\t\65\x41""#),
            vec![TokenKind::Str(b"a\nb\tAA".to_vec())]
        );
    }

    #[test]
    fn test_long_string() {
        assert_eq!(
            kinds("[[hello\nworld]]"),
            vec![TokenKind::Str(b"hello\nworld".to_vec())]
        );
        assert_eq!(kinds("[==[a]=]b]==]"), vec![TokenKind::Str(b"a]=]b".to_vec())]);
    }

    #[test]
    fn test_long_string_skips_leading_newline() {
        assert_eq!(kinds("[[\nabc]]"), vec![TokenKind::Str(b"abc".to_vec())]);
    }

    #[test]
    fn test_comments() {
        assert_eq!(kinds("-- line comment\n1"), vec![TokenKind::Int(1)]);
        assert_eq!(kinds("--[[ block\ncomment ]]2"), vec![TokenKind::Int(2)]);
    }

    #[test]
    fn test_line_tracking() {
        let tokens = tokenize(b"a\nb\n\nc", "test").unwrap();
        let lines: Vec<u32> = tokens.iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 2, 4]);
    }

    #[test]
    fn test_multi_char_symbols() {
        assert_eq!(
            kinds("a ~= b >> 1 // 2 ... :: <="),
            vec![
                TokenKind::Identifier("a".to_string()),
                TokenKind::Neq,
                TokenKind::Identifier("b".to_string()),
                TokenKind::Shr,
                TokenKind::Int(1),
                TokenKind::DoubleSlash,
                TokenKind::Int(2),
                TokenKind::Ellipsis,
                TokenKind::DoubleColon,
                TokenKind::Lte,
            ]
        );
    }

    #[test]
    fn test_unfinished_string_errors() {
        assert!(tokenize(b"\"abc", "test").is_err());
        assert!(tokenize(b"[[abc", "test").is_err());
    }

    #[test]
    fn test_shebang_skipped() {
        assert_eq!(kinds("#!/usr/bin/lua\nreturn 1"), vec![TokenKind::Return, TokenKind::Int(1)]);
    }
}
