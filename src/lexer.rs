//! Tokenizer.
//!
//! [`Lexer::tokenize`] turns expression text into a flat token sequence. Parentheses are
//! scanned by re-entering the scanner after each `(` so that unbalanced brackets are
//! caught here, but the output keeps the brackets as ordinary operator tokens.
//!
//! [`skip_expression`] recognises the same language without building tokens. Hosts that
//! embed expressions inside a larger syntax use it to find where an expression ends.

extern crate alloc;

use crate::error::{ExprError, Result};
use crate::types::OpType;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

const OPERATOR_CHARS: &[u8] = b"()!~*/%+-<>=&^|?:,";

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    Operator(OpType),
    Integer(i64),
    Real(f64),
    Str(String),
}

/// A token with the byte offset where it starts in the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

impl Token {
    pub fn new(kind: TokenKind, position: usize) -> Self {
        Self { kind, position }
    }

    pub fn is_operator(&self, op: OpType) -> bool {
        self.kind == TokenKind::Operator(op)
    }

    pub fn operator(&self) -> Option<OpType> {
        match self.kind {
            TokenKind::Operator(op) => Some(op),
            _ => None,
        }
    }

    pub fn identifier(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Identifier(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    /// Renders the token as source text that scans back to an equal token.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TokenKind::Identifier(name) => f.write_str(name),
            TokenKind::Operator(op) => f.write_str(op.symbol()),
            TokenKind::Integer(i) => write!(f, "{}", i),
            TokenKind::Real(r) => write!(f, "{:?}", r),
            TokenKind::Str(s) => write!(f, "\"{}\"", encode_escapes(s)),
        }
    }
}

/// A scanned numeric literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(i64),
    Real(f64),
}

/// What the scanner saw last at the current nesting level.
#[derive(Clone, Copy, PartialEq)]
enum Last {
    Nothing,
    Operator,
    Operand,
}

/// The tokenizer.
pub struct Lexer<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pub pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    /// Tokenize a complete expression.
    pub fn tokenize(input: &str) -> Result<Vec<Token>> {
        let mut lexer = Lexer::new(input);
        let mut tokens = Vec::new();
        lexer.scan(&mut tokens, None)?;
        Ok(tokens)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn error(&self, position: usize, message: &str) -> ExprError {
        ExprError::Lexical {
            position,
            message: message.to_string(),
        }
    }

    /// Scan one bracket level. `open` is the position of the `(` that started it.
    fn scan(&mut self, tokens: &mut Vec<Token>, open: Option<usize>) -> Result<()> {
        let mut last = Last::Nothing;

        loop {
            self.skip_whitespace();

            let Some(c) = self.peek() else {
                return match open {
                    Some(position) => Err(self.error(position, "Missing close round bracket")),
                    None => Ok(()),
                };
            };

            let start = self.pos;

            let kind = if OPERATOR_CHARS.contains(&c) {
                let signed_number = last != Last::Operand
                    && (c == b'+' || c == b'-')
                    && self.peek_at(1).is_some_and(|d| d.is_ascii_digit());

                if signed_number {
                    self.read_number()?
                } else {
                    let op = scan_operator(self.bytes, &mut self.pos)
                        .ok_or_else(|| self.error(start, "Invalid Token"))?;

                    match op {
                        OpType::OpenRBracket => {
                            tokens.push(Token::new(TokenKind::Operator(op), start));
                            self.scan(tokens, Some(start))?;
                            last = Last::Operand;
                            continue;
                        }
                        OpType::CloseRBracket => {
                            if open.is_none() {
                                return Err(self.error(start, "Unmatched close round bracket"));
                            }
                            tokens.push(Token::new(TokenKind::Operator(op), start));
                            return Ok(());
                        }
                        _ => TokenKind::Operator(op),
                    }
                }
            } else if is_number_start(self.bytes, self.pos) {
                self.read_number()?
            } else if c == b'_' || c.is_ascii_alphabetic() {
                let end = scan_identifier(self.bytes, self.pos);
                let name = &self.input[self.pos..end];
                self.pos = end;
                TokenKind::Identifier(name.to_string())
            } else if c == b'\'' || c == b'"' {
                self.read_string()?
            } else {
                return Err(self.error(start, "Invalid Character"));
            };

            last = match kind {
                TokenKind::Operator(_) => Last::Operator,
                _ => Last::Operand,
            };

            tokens.push(Token::new(kind, start));
        }
    }

    fn read_number(&mut self) -> Result<TokenKind> {
        let start = self.pos;
        let (number, end) =
            scan_number(self.input, start).ok_or_else(|| self.error(start, "Invalid Number"))?;
        self.pos = end;

        Ok(match number {
            Number::Integer(i) => TokenKind::Integer(i),
            Number::Real(r) => TokenKind::Real(r),
        })
    }

    fn read_string(&mut self) -> Result<TokenKind> {
        let start = self.pos;
        let quote = self.bytes[start];
        let end = scan_string(self.bytes, start)
            .ok_or_else(|| self.error(start, "Unterminated string"))?;

        // `end` is one past the closing quote.
        let body = &self.input[start + 1..end - 1];
        self.pos = end;

        if quote == b'"' {
            Ok(TokenKind::Str(decode_escapes(body)))
        } else {
            Ok(TokenKind::Str(body.to_string()))
        }
    }
}

/// Render a lexical error the way it is shown to the user: the line with the offending
/// character fenced by `#` marks, and a caret underneath.
pub fn diagnostic(input: &str, position: usize, message: &str) -> String {
    let position = position.min(input.len());
    let (head, rest) = input.split_at(position);
    let mut chars = rest.chars();
    let current = chars.next().map(|c| c.to_string()).unwrap_or_default();
    let tail = chars.as_str();

    let mut text = format!("{} \"{}#{}#{}\"\n", message, head, current, tail);
    for _ in 0..(position + message.len() + 2) {
        text.push(' ');
    }
    text.push('^');
    text
}

fn is_number_start(bytes: &[u8], i: usize) -> bool {
    match bytes.get(i) {
        Some(c) if c.is_ascii_digit() => true,
        Some(b'.') => bytes.get(i + 1).is_some_and(|d| d.is_ascii_digit()),
        _ => false,
    }
}

fn scan_identifier(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < bytes.len() && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric()) {
        i += 1;
    }
    i
}

/// Find the end of a quoted string starting at `start`. A backslash always protects the
/// next character, so `'it\'s'` is one literal even though escapes are not decoded in
/// single quotes. Returns the index one past the closing quote.
fn scan_string(bytes: &[u8], start: usize) -> Option<usize> {
    let quote = bytes[start];
    let mut i = start + 1;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            return Some(i + 1);
        }
        i += 1;
    }

    None
}

/// Greedy longest-match operator scan.
fn scan_operator(bytes: &[u8], pos: &mut usize) -> Option<OpType> {
    let c = *bytes.get(*pos)?;
    let next = bytes.get(*pos + 1).copied();
    let third = bytes.get(*pos + 2).copied();

    let (op, len) = match (c, next) {
        (b'(', _) => (OpType::OpenRBracket, 1),
        (b')', _) => (OpType::CloseRBracket, 1),
        (b'!', Some(b'=')) => (OpType::NotEqual, 2),
        (b'!', _) => (OpType::LogicalNot, 1),
        (b'~', Some(b'=')) => (OpType::ApproxEqual, 2),
        (b'~', _) => (OpType::BitNot, 1),
        (b'*', Some(b'=')) => (OpType::TimesEquals, 2),
        (b'*', Some(b'*')) => (OpType::Power, 2),
        (b'*', _) => (OpType::Times, 1),
        (b'/', Some(b'=')) => (OpType::DivideEquals, 2),
        (b'/', _) => (OpType::Divide, 1),
        (b'%', Some(b'=')) => (OpType::ModulusEquals, 2),
        (b'%', _) => (OpType::Modulus, 1),
        (b'+', Some(b'+')) => (OpType::Increment, 2),
        (b'+', Some(b'=')) => (OpType::PlusEquals, 2),
        (b'+', _) => (OpType::Plus, 1),
        (b'-', Some(b'-')) => (OpType::Decrement, 2),
        (b'-', Some(b'=')) => (OpType::MinusEquals, 2),
        (b'-', _) => (OpType::Minus, 1),
        (b'<', Some(b'=')) => (OpType::LessEqual, 2),
        (b'<', Some(b'<')) if third == Some(b'=') => (OpType::BitLShiftEquals, 3),
        (b'<', Some(b'<')) => (OpType::BitLShift, 2),
        (b'<', _) => (OpType::Less, 1),
        (b'>', Some(b'=')) => (OpType::GreaterEqual, 2),
        (b'>', Some(b'>')) if third == Some(b'=') => (OpType::BitRShiftEquals, 3),
        (b'>', Some(b'>')) => (OpType::BitRShift, 2),
        (b'>', _) => (OpType::Greater, 1),
        (b'=', Some(b'=')) => (OpType::Equal, 2),
        (b'=', _) => (OpType::Equals, 1),
        (b'&', Some(b'&')) => (OpType::LogicalAnd, 2),
        (b'&', Some(b'=')) => (OpType::BitAndEquals, 2),
        (b'&', _) => (OpType::BitAnd, 1),
        (b'^', Some(b'=')) => (OpType::BitXorEquals, 2),
        (b'^', _) => (OpType::BitXor, 1),
        (b'|', Some(b'|')) => (OpType::LogicalOr, 2),
        (b'|', Some(b'=')) => (OpType::BitOrEquals, 2),
        (b'|', _) => (OpType::BitOr, 1),
        (b'?', _) => (OpType::Question, 1),
        (b':', _) => (OpType::Colon, 1),
        (b',', _) => (OpType::Comma, 1),
        _ => return None,
    };

    *pos += len;
    Some(op)
}

/// Scan a numeric literal at `start`.
///
/// Accepts an optional sign, hex (`0x1F`), octal (leading zero, all digits 0-7), decimal,
/// fraction and exponent forms. A trailing `l`, `L`, `u` or `U` on an integer is skipped.
/// Returns the number and the index one past the literal.
pub fn scan_number(input: &str, start: usize) -> Option<(Number, usize)> {
    let bytes = input.as_bytes();
    let mut i = start;

    let negative = match bytes.get(i) {
        Some(b'-') => {
            i += 1;
            true
        }
        Some(b'+') => {
            i += 1;
            false
        }
        _ => false,
    };

    if i >= bytes.len() {
        return None;
    }

    let apply_sign = |v: u64| -> i64 {
        let v = v as i64;
        if negative { v.wrapping_neg() } else { v }
    };

    if bytes[i] == b'0'
        && matches!(bytes.get(i + 1), Some(b'x' | b'X'))
        && bytes.get(i + 2).is_some_and(|c| c.is_ascii_hexdigit())
    {
        let digits_start = i + 2;
        let mut j = digits_start;
        while j < bytes.len() && bytes[j].is_ascii_hexdigit() {
            j += 1;
        }
        let value = u64::from_str_radix(&input[digits_start..j], 16).ok()?;
        return Some((Number::Integer(apply_sign(value)), j));
    }

    let digits_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let int_end = i;

    let point_found = bytes.get(i) == Some(&b'.');
    if point_found {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }

    let mut exponent_found = false;
    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        if bytes.get(j).is_some_and(|c| c.is_ascii_digit()) {
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
            exponent_found = true;
        }
    }

    if point_found || exponent_found {
        let real = input[start..i].parse::<f64>().ok()?;
        return Some((Number::Real(real), i));
    }

    if int_end == digits_start {
        return None;
    }

    let digits = &input[digits_start..int_end];
    let end = if matches!(bytes.get(int_end), Some(b'l' | b'L' | b'u' | b'U')) {
        int_end + 1
    } else {
        int_end
    };

    let octal = digits.len() > 1 && digits.starts_with('0') && digits.bytes().all(|c| c < b'8');
    let parsed = if octal {
        u64::from_str_radix(&digits[1..], 8).ok()
    } else {
        digits.parse::<u64>().ok()
    };

    match parsed {
        Some(value) if value <= i64::MAX as u64 => Some((Number::Integer(apply_sign(value)), end)),
        // Too large for an integer: keep the magnitude as a real.
        _ => {
            let real = digits.parse::<f64>().ok()?;
            Some((Number::Real(if negative { -real } else { real }), end))
        }
    }
}

/// Decode backslash escapes of a double-quoted string body.
///
/// Supports `\a \b \e \f \n \r \t \v \\ \' \"`, `\xH` / `\xHH` hex and `\N` to `\NNN`
/// octal. Unknown escapes are kept verbatim, backslash included.
pub fn decode_escapes(body: &str) -> String {
    if !body.contains('\\') {
        return body.to_string();
    }

    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        let Some(e) = chars.next() else {
            out.push('\\');
            break;
        };

        match e {
            'a' => out.push('\u{07}'),
            'b' => out.push('\u{08}'),
            'e' => out.push('\u{1b}'),
            'f' => out.push('\u{0c}'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\u{0b}'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'x' => {
                let mut value = 0u32;
                let mut count = 0;
                while count < 2 {
                    match chars.peek().and_then(|d| d.to_digit(16)) {
                        Some(d) => {
                            value = value * 16 + d;
                            chars.next();
                            count += 1;
                        }
                        None => break,
                    }
                }
                if count == 0 {
                    out.push('\\');
                    out.push('x');
                } else {
                    out.push(char::from(value as u8));
                }
            }
            '0'..='7' => {
                let mut value = e.to_digit(8).unwrap_or(0);
                let mut count = 1;
                while count < 3 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                            count += 1;
                        }
                        None => break,
                    }
                }
                out.push(char::from((value & 0xff) as u8));
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }

    out
}

/// Encode a string so that [`decode_escapes`] gives it back. Used when rendering string
/// literals.
pub fn encode_escapes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());

    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{07}' => out.push_str("\\a"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0b}' => out.push_str("\\v"),
            '\u{0c}' => out.push_str("\\f"),
            '\u{1b}' => out.push_str("\\e"),
            c if c.is_ascii_control() => {
                let b = c as u8;
                out.push('\\');
                out.push(char::from(b'0' + (b >> 6)));
                out.push(char::from(b'0' + ((b >> 3) & 7)));
                out.push(char::from(b'0' + (b & 7)));
            }
            c => out.push(c),
        }
    }

    out
}

/// Operand kinds tracked by [`skip_expression`].
#[derive(Clone, Copy, PartialEq)]
enum SkipLast {
    Nothing,
    Operator(OpType),
    Number,
    Identifier,
    Str,
    Value,
}

impl SkipLast {
    fn is_operand(self) -> bool {
        !matches!(self, SkipLast::Nothing | SkipLast::Operator(_))
    }
}

/// Advance `pos` past one expression embedded in `line` without evaluating it.
///
/// The expression ends at a top-level `,`, an unmatched `)` or `:`, an operand directly
/// following another operand, or an operator directly following a string operand. On
/// failure (unterminated bracket, string or ternary) `pos` is left unchanged and `false`
/// is returned.
pub fn skip_expression(line: &str, pos: &mut usize) -> bool {
    skip_until(line, pos, b"")
}

fn skip_until(line: &str, pos: &mut usize, end_chars: &[u8]) -> bool {
    let bytes = line.as_bytes();
    let start = *pos;
    let mut i = *pos;
    let mut last = SkipLast::Nothing;

    let skip_space = |i: &mut usize| {
        while *i < bytes.len() && bytes[*i].is_ascii_whitespace() {
            *i += 1;
        }
    };

    loop {
        skip_space(&mut i);
        if i >= bytes.len() {
            break;
        }

        let prev = last;
        let c = bytes[i];

        if OPERATOR_CHARS.contains(&c) {
            if c == b',' || end_chars.contains(&c) {
                break;
            }

            let op_start = i;

            let signed_number = matches!(prev, SkipLast::Operator(_))
                && (c == b'+' || c == b'-')
                && bytes.get(i + 1).is_some_and(|d| d.is_ascii_digit());

            if signed_number {
                match scan_number(line, i) {
                    Some((_, end)) => i = end,
                    None => break,
                }
                last = SkipLast::Number;
                continue;
            }

            let Some(op) = scan_operator(bytes, &mut i) else {
                break;
            };

            if prev == SkipLast::Str {
                i = op_start;
                break;
            }

            match op {
                OpType::OpenRBracket => {
                    loop {
                        if !skip_until(line, &mut i, b",)") {
                            return false;
                        }
                        skip_space(&mut i);
                        if i >= bytes.len() || bytes[i] != b',' {
                            break;
                        }
                        i += 1;
                    }

                    skip_space(&mut i);
                    if i >= bytes.len() || bytes[i] != b')' {
                        *pos = start;
                        return false;
                    }
                    i += 1;
                    last = SkipLast::Value;
                }
                OpType::CloseRBracket | OpType::Colon => {
                    i = op_start;
                    break;
                }
                OpType::Question => {
                    if !skip_until(line, &mut i, b":") {
                        *pos = start;
                        return false;
                    }
                    skip_space(&mut i);
                    if i >= bytes.len() || bytes[i] != b':' {
                        *pos = start;
                        return false;
                    }
                    i += 1;
                    skip_space(&mut i);
                    if !skip_until(line, &mut i, b"") {
                        *pos = start;
                        return false;
                    }
                    last = SkipLast::Value;
                }
                _ => last = SkipLast::Operator(op),
            }
        } else if is_number_start(bytes, i) {
            if prev.is_operand() {
                break;
            }
            match scan_number(line, i) {
                Some((_, end)) => i = end,
                None => {
                    *pos = start;
                    return false;
                }
            }
            last = SkipLast::Number;
        } else if c == b'_' || c.is_ascii_alphabetic() {
            if prev.is_operand() {
                break;
            }
            i = scan_identifier(bytes, i);
            last = SkipLast::Identifier;
        } else if c == b'\'' || c == b'"' {
            if prev.is_operand() {
                break;
            }
            match scan_string(bytes, i) {
                Some(end) => i = end,
                None => {
                    *pos = start;
                    return false;
                }
            }
            last = match prev {
                SkipLast::Operator(op) if op.is_comparison() => SkipLast::Value,
                _ => SkipLast::Str,
            };
        } else {
            break;
        }
    }

    *pos = i;
    true
}
