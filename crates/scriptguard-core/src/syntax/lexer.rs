//! Tokenizer for the script grammar.
//!
//! Produces a flat token stream with explicit `Newline`, `Indent` and `Dedent`
//! tokens so the parser never has to look at whitespace. Bracket nesting
//! suspends line handling, and a trailing backslash joins physical lines.

use super::diagnostic::{Diagnostic, Span};
use super::token::{Keyword, Op, Token, TokenKind, OPERATORS};

/// Tokenize a whole script.
///
/// # Errors
///
/// Returns the first lexical error (bad indentation, unterminated string,
/// unsupported literal, stray character) as a [`Diagnostic`].
pub fn tokenize(source: &str) -> Result<Vec<Token>, Diagnostic> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    indents: Vec<usize>,
    depth: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            indents: vec![0],
            depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.column)
    }

    fn push(&mut self, kind: TokenKind, span: Span) {
        self.tokens.push(Token { kind, span });
    }

    fn error<T>(&self, span: Span, message: impl Into<String>) -> Result<T, Diagnostic> {
        Err(Diagnostic::new(span, message))
    }

    fn last_is_newline(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline) | Some(TokenKind::Indent) | Some(TokenKind::Dedent)
        )
    }

    fn run(mut self) -> Result<Vec<Token>, Diagnostic> {
        loop {
            if self.at_line_start && self.depth == 0 {
                if !self.handle_indentation()? {
                    break;
                }
                continue;
            }

            let Some(c) = self.peek() else { break };
            match c {
                ' ' | '\t' | '\x0c' => {
                    self.advance();
                }
                '#' => self.skip_comment(),
                '\\' => {
                    let span = self.span();
                    self.advance();
                    match self.peek() {
                        Some('\n') => {
                            self.advance();
                        }
                        Some('\r') if self.peek_at(1) == Some('\n') => {
                            self.advance();
                            self.advance();
                        }
                        _ => return self.error(span, "unexpected character after line continuation"),
                    }
                }
                '\r' | '\n' => {
                    let span = self.span();
                    self.advance();
                    if c == '\r' && self.peek() == Some('\n') {
                        self.advance();
                    }
                    if self.depth == 0 {
                        if !self.last_is_newline() {
                            self.push(TokenKind::Newline, span);
                        }
                        self.at_line_start = true;
                    }
                }
                '\'' | '"' => {
                    let span = self.span();
                    let kind = self.read_string(StringPrefix::default(), span)?;
                    self.push(kind, span);
                }
                c if c.is_ascii_digit() => self.read_number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.read_number()?,
                c if c == '_' || c.is_alphabetic() => self.read_name()?,
                _ => self.read_operator()?,
            }
        }

        let span = self.span();
        if !self.last_is_newline() {
            self.push(TokenKind::Newline, span);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, span);
        }
        self.push(TokenKind::EndOfFile, span);
        Ok(self.tokens)
    }

    /// Measure leading whitespace of a logical line and emit indent/dedent
    /// tokens. Returns `false` at end of input.
    fn handle_indentation(&mut self) -> Result<bool, Diagnostic> {
        let mut width = 0usize;
        loop {
            match self.peek() {
                Some(' ') => width += 1,
                Some('\t') => width = (width / 8 + 1) * 8,
                Some('\x0c') => width = 0,
                _ => break,
            }
            self.advance();
        }

        match self.peek() {
            None => return Ok(false),
            Some('#') => {
                self.skip_comment();
                return Ok(true);
            }
            Some('\n') | Some('\r') => {
                self.advance();
                if self.peek() == Some('\n') {
                    self.advance();
                }
                return Ok(true);
            }
            _ => {}
        }

        let span = self.span();
        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(TokenKind::Indent, span);
        } else if width < current {
            while self.indents.last().is_some_and(|&w| w > width) {
                self.indents.pop();
                self.push(TokenKind::Dedent, span);
            }
            if self.indents.last() != Some(&width) {
                return self.error(span, "unindent does not match any outer indentation level");
            }
        }
        self.at_line_start = false;
        Ok(true)
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' || c == '\r' {
                break;
            }
            self.advance();
        }
    }

    fn read_name(&mut self) -> Result<(), Diagnostic> {
        let span = self.span();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                self.advance();
            } else {
                break;
            }
        }
        let ident: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(), Some('\'') | Some('"')) {
            if let Some(prefix) = StringPrefix::parse(&ident) {
                if prefix.formatted {
                    return self.error(span, "f-strings are not supported");
                }
                let kind = self.read_string(prefix, span)?;
                self.push(kind, span);
                return Ok(());
            }
        }

        let kind = match Keyword::from_ident(&ident) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Name(ident),
        };
        self.push(kind, span);
        Ok(())
    }

    fn read_digits(&mut self, radix: u32) -> String {
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if c == '_' && self.peek_at(1).is_some_and(|d| d.is_digit(radix)) {
                self.advance();
            } else if c.is_digit(radix) {
                digits.push(c);
                self.advance();
            } else {
                break;
            }
        }
        digits
    }

    fn read_number(&mut self) -> Result<(), Diagnostic> {
        let span = self.span();

        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x') | Some('X') => Some(16),
                Some('o') | Some('O') => Some(8),
                Some('b') | Some('B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.advance();
                self.advance();
                let digits = self.read_digits(radix);
                if digits.is_empty() {
                    return self.error(span, "invalid integer literal");
                }
                return match i64::from_str_radix(&digits, radix) {
                    Ok(v) => {
                        self.push(TokenKind::Int(v), span);
                        Ok(())
                    }
                    Err(_) => self.error(span, "integer literal is too large"),
                };
            }
        }

        let mut text = self.read_digits(10);
        let mut is_float = false;
        if self.peek() == Some('.') {
            is_float = true;
            self.advance();
            text.push('.');
            text.push_str(&self.read_digits(10));
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = self.peek_at(1);
            let has_digits = match sign {
                Some('+') | Some('-') => self.peek_at(2).is_some_and(|d| d.is_ascii_digit()),
                Some(d) => d.is_ascii_digit(),
                None => false,
            };
            if has_digits {
                is_float = true;
                self.advance();
                text.push('e');
                if matches!(sign, Some('+') | Some('-')) {
                    text.push(self.advance().unwrap_or('+'));
                }
                text.push_str(&self.read_digits(10));
            }
        }
        if matches!(self.peek(), Some('j') | Some('J')) {
            return self.error(span, "complex literals are not supported");
        }

        if is_float {
            let normalized = if text.starts_with('.') {
                format!("0{text}")
            } else {
                text
            };
            match normalized.parse::<f64>() {
                Ok(v) => self.push(TokenKind::Float(v), span),
                Err(_) => return self.error(span, "invalid float literal"),
            }
        } else {
            match text.parse::<i64>() {
                Ok(v) => self.push(TokenKind::Int(v), span),
                Err(_) => return self.error(span, "integer literal is too large"),
            }
        }
        Ok(())
    }

    fn read_string(&mut self, prefix: StringPrefix, span: Span) -> Result<TokenKind, Diagnostic> {
        let quote = self.advance().unwrap_or('"');
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.advance();
            self.advance();
        }

        let mut units: Vec<u32> = Vec::new();
        loop {
            let Some(c) = self.peek() else {
                return self.error(span, "unterminated string literal");
            };
            if c == quote {
                if !triple {
                    self.advance();
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.advance();
                    self.advance();
                    self.advance();
                    break;
                }
            }
            if (c == '\n' || c == '\r') && !triple {
                return self.error(span, "unterminated string literal");
            }
            self.advance();

            if c != '\\' {
                if prefix.bytes && !c.is_ascii() {
                    return self.error(span, "bytes can only contain ASCII literal characters");
                }
                units.push(c as u32);
                continue;
            }

            let Some(esc) = self.advance() else {
                return self.error(span, "unterminated string literal");
            };
            if prefix.raw {
                units.push('\\' as u32);
                units.push(esc as u32);
                continue;
            }
            match esc {
                '\n' => {}
                '\\' => units.push('\\' as u32),
                '\'' => units.push('\'' as u32),
                '"' => units.push('"' as u32),
                'a' => units.push(0x07),
                'b' => units.push(0x08),
                'f' => units.push(0x0c),
                'n' => units.push('\n' as u32),
                'r' => units.push('\r' as u32),
                't' => units.push('\t' as u32),
                'v' => units.push(0x0b),
                '0'..='7' => {
                    let mut value = esc.to_digit(8).unwrap_or(0);
                    for _ in 0..2 {
                        match self.peek().and_then(|d| d.to_digit(8)) {
                            Some(d) => {
                                value = value * 8 + d;
                                self.advance();
                            }
                            None => break,
                        }
                    }
                    units.push(value);
                }
                'x' => units.push(self.read_hex_escape(2, span)?),
                'u' if !prefix.bytes => units.push(self.read_hex_escape(4, span)?),
                'U' if !prefix.bytes => units.push(self.read_hex_escape(8, span)?),
                'N' if !prefix.bytes => {
                    return self.error(span, "named unicode escapes are not supported")
                }
                other => {
                    units.push('\\' as u32);
                    units.push(other as u32);
                }
            }
        }

        if prefix.bytes {
            let mut bytes = Vec::with_capacity(units.len());
            for u in units {
                match u8::try_from(u) {
                    Ok(b) => bytes.push(b),
                    Err(_) => return self.error(span, "bytes escape out of range"),
                }
            }
            Ok(TokenKind::Bytes(bytes))
        } else {
            let mut text = String::with_capacity(units.len());
            for u in units {
                match char::from_u32(u) {
                    Some(ch) => text.push(ch),
                    None => return self.error(span, "invalid unicode escape"),
                }
            }
            Ok(TokenKind::Str(text))
        }
    }

    fn read_hex_escape(&mut self, len: usize, span: Span) -> Result<u32, Diagnostic> {
        let mut value = 0u32;
        for _ in 0..len {
            match self.peek().and_then(|d| d.to_digit(16)) {
                Some(d) => {
                    value = value.wrapping_mul(16).wrapping_add(d);
                    self.advance();
                }
                None => return self.error(span, "truncated hex escape"),
            }
        }
        Ok(value)
    }

    fn read_operator(&mut self) -> Result<(), Diagnostic> {
        let span = self.span();
        for (spelling, op) in OPERATORS {
            let matches = spelling
                .chars()
                .enumerate()
                .all(|(i, ch)| self.peek_at(i) == Some(ch));
            if !matches {
                continue;
            }
            for _ in 0..spelling.len() {
                self.advance();
            }
            match op {
                Op::LParen | Op::LBracket | Op::LBrace => self.depth += 1,
                Op::RParen | Op::RBracket | Op::RBrace => {
                    self.depth = self.depth.saturating_sub(1);
                }
                _ => {}
            }
            self.push(TokenKind::Op(*op), span);
            return Ok(());
        }
        let c = self.peek().unwrap_or(' ');
        self.error(span, format!("invalid character '{c}' in source"))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StringPrefix {
    raw: bool,
    bytes: bool,
    formatted: bool,
}

impl StringPrefix {
    fn parse(ident: &str) -> Option<Self> {
        if ident.len() > 2 {
            return None;
        }
        let mut prefix = StringPrefix::default();
        for c in ident.chars() {
            match c.to_ascii_lowercase() {
                'r' if !prefix.raw => prefix.raw = true,
                'b' if !prefix.bytes && !prefix.formatted => prefix.bytes = true,
                'f' if !prefix.bytes && !prefix.formatted => prefix.formatted = true,
                'u' if ident.len() == 1 => {}
                _ => return None,
            }
        }
        Some(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_indent_and_dedent_are_balanced() {
        let toks = kinds("def f():\n    return 1\n");
        let indents = toks.iter().filter(|k| **k == TokenKind::Indent).count();
        let dedents = toks.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!(indents, 1);
        assert_eq!(dedents, 1);
        assert_eq!(toks.last(), Some(&TokenKind::EndOfFile));
    }

    #[test]
    fn test_brackets_suppress_newlines() {
        let toks = kinds("x = [1,\n     2]\n");
        let newlines = toks.iter().filter(|k| **k == TokenKind::Newline).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn test_blank_and_comment_lines_are_skipped() {
        let toks = kinds("def f():\n\n    # note\n    pass\n");
        assert!(!toks.windows(2).any(|w| w[0] == TokenKind::Newline && w[1] == TokenKind::Newline));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("0x1f")[0], TokenKind::Int(31));
        assert_eq!(kinds("1_000")[0], TokenKind::Int(1000));
        assert_eq!(kinds("2.5")[0], TokenKind::Float(2.5));
        assert_eq!(kinds(".5")[0], TokenKind::Float(0.5));
        assert_eq!(kinds("1e3")[0], TokenKind::Float(1000.0));
    }

    #[test]
    fn test_complex_literal_rejected() {
        let err = tokenize("3j").unwrap_err();
        assert!(err.message.contains("complex"));
    }

    #[test]
    fn test_string_escapes_and_prefixes() {
        assert_eq!(kinds(r#""a\tb""#)[0], TokenKind::Str("a\tb".into()));
        assert_eq!(kinds(r#"r"a\tb""#)[0], TokenKind::Str("a\\tb".into()));
        assert_eq!(kinds(r#"b"\x00A""#)[0], TokenKind::Bytes(vec![0, b'A']));
        assert_eq!(
            kinds("'''line1\nline2'''")[0],
            TokenKind::Str("line1\nline2".into())
        );
    }

    #[test]
    fn test_f_string_rejected() {
        let err = tokenize("f'{x}'").unwrap_err();
        assert!(err.message.contains("f-strings"));
    }

    #[test]
    fn test_bad_dedent_reports_position() {
        let err = tokenize("def f():\n        a = 1\n    b = 2\n").unwrap_err();
        assert_eq!(err.span.line, 3);
    }

    #[test]
    fn test_operators_match_longest() {
        let toks = kinds("a //= b ** c");
        assert_eq!(toks[1], TokenKind::Op(Op::DoubleSlashEq));
        assert_eq!(toks[3], TokenKind::Op(Op::DoubleStar));
    }
}
