//! Forgiving recursive-descent JSON parser for truncated input.
//!
//! The input is expected to be a prefix of a valid JSON object or array.
//! Whatever is open at end of input is closed virtually:
//!
//! - an unterminated string value keeps the characters received so far
//!   (a dangling escape sequence is dropped);
//! - an object member whose key or value is incomplete is dropped, so a
//!   partial parse never shows a key the complete document lacks;
//! - a number or literal cut by end of input is dropped, since its final
//!   value is unknown;
//! - trailing commas are accepted.
//!
//! Anything that is not a truncation (bad escapes, malformed numbers,
//! unexpected characters, trailing text after the root value) fails.

use serde_json::{Map, Number, Value};

const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    /// Input ended inside a token that cannot be materialized.
    Eof,
    Malformed,
}

/// Parses `input` leniently. Returns `None` unless the input starts with an
/// object or array and is a well-formed prefix of one.
pub(crate) fn parse(input: &str) -> Option<Value> {
    let mut parser = Parser {
        src: input,
        bytes: input.as_bytes(),
        pos: 0,
        depth: 0,
    };
    parser.skip_ws();
    if !matches!(parser.peek(), Some(b'{' | b'[')) {
        return None;
    }
    let value = parser.value().ok()?;
    parser.skip_ws();
    if parser.pos < parser.bytes.len() {
        return None;
    }
    Some(value)
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn value(&mut self) -> Result<Value, Halt> {
        self.skip_ws();
        match self.peek() {
            None => Err(Halt::Eof),
            Some(b'{') => self.object(),
            Some(b'[') => self.array(),
            Some(b'"') => self.string().map(|(text, _)| Value::String(text)),
            Some(b't') => self.literal("true", Value::Bool(true)),
            Some(b'f') => self.literal("false", Value::Bool(false)),
            Some(b'n') => self.literal("null", Value::Null),
            Some(b'-' | b'0'..=b'9') => self.number(),
            Some(_) => Err(Halt::Malformed),
        }
    }

    fn enter(&mut self) -> Result<(), Halt> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(Halt::Malformed);
        }
        self.pos += 1;
        Ok(())
    }

    fn object(&mut self) -> Result<Value, Halt> {
        self.enter()?;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => break,
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                Some(b'"') => {}
                Some(_) => return Err(Halt::Malformed),
            }

            let (key, closed) = self.string()?;
            if !closed {
                break;
            }
            self.skip_ws();
            match self.peek() {
                None => break,
                Some(b':') => self.pos += 1,
                Some(_) => return Err(Halt::Malformed),
            }
            match self.value() {
                Ok(value) => {
                    map.insert(key, value);
                }
                Err(Halt::Eof) => break,
                Err(err) => return Err(err),
            }

            self.skip_ws();
            match self.peek() {
                None => break,
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => return Err(Halt::Malformed),
            }
        }
        self.depth -= 1;
        Ok(Value::Object(map))
    }

    fn array(&mut self) -> Result<Value, Halt> {
        self.enter()?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => break,
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {}
            }

            match self.value() {
                Ok(value) => items.push(value),
                Err(Halt::Eof) => break,
                Err(err) => return Err(err),
            }

            self.skip_ws();
            match self.peek() {
                None => break,
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => return Err(Halt::Malformed),
            }
        }
        self.depth -= 1;
        Ok(Value::Array(items))
    }

    /// Reads a string starting at the opening quote. The flag reports whether
    /// the closing quote was seen.
    fn string(&mut self) -> Result<(String, bool), Halt> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            let rest = &self.src[self.pos..];
            let Some(offset) = rest.find(['"', '\\']) else {
                out.push_str(rest);
                self.pos = self.bytes.len();
                return Ok((out, false));
            };
            out.push_str(&rest[..offset]);
            self.pos += offset;
            if self.bytes[self.pos] == b'"' {
                self.pos += 1;
                return Ok((out, true));
            }
            match self.escape()? {
                Some(ch) => out.push(ch),
                None => {
                    self.pos = self.bytes.len();
                    return Ok((out, false));
                }
            }
        }
    }

    /// Decodes the escape at the current backslash. `None` means the escape
    /// was cut by end of input.
    fn escape(&mut self) -> Result<Option<char>, Halt> {
        let Some(&code) = self.bytes.get(self.pos + 1) else {
            return Ok(None);
        };
        let ch = match code {
            b'"' => '"',
            b'\\' => '\\',
            b'/' => '/',
            b'b' => '\u{8}',
            b'f' => '\u{c}',
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'u' => return self.unicode_escape(),
            _ => return Err(Halt::Malformed),
        };
        self.pos += 2;
        Ok(Some(ch))
    }

    fn unicode_escape(&mut self) -> Result<Option<char>, Halt> {
        let Some(high) = self.hex4(self.pos + 2)? else {
            return Ok(None);
        };
        if (0xDC00..0xE000).contains(&high) {
            return Err(Halt::Malformed);
        }
        if !(0xD800..0xDC00).contains(&high) {
            self.pos += 6;
            return char::from_u32(high).map(Some).ok_or(Halt::Malformed);
        }

        match (self.bytes.get(self.pos + 6), self.bytes.get(self.pos + 7)) {
            (None, _) | (Some(b'\\'), None) => Ok(None),
            (Some(b'\\'), Some(b'u')) => {
                let Some(low) = self.hex4(self.pos + 8)? else {
                    return Ok(None);
                };
                if !(0xDC00..0xE000).contains(&low) {
                    return Err(Halt::Malformed);
                }
                self.pos += 12;
                let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                char::from_u32(code).map(Some).ok_or(Halt::Malformed)
            }
            _ => Err(Halt::Malformed),
        }
    }

    fn hex4(&self, start: usize) -> Result<Option<u32>, Halt> {
        let available = self.bytes.get(start..).unwrap_or_default();
        let digits = &available[..available.len().min(4)];
        let mut code = 0_u32;
        for &digit in digits {
            let nibble = char::from(digit).to_digit(16).ok_or(Halt::Malformed)?;
            code = (code << 4) | nibble;
        }
        Ok((digits.len() == 4).then_some(code))
    }

    fn number(&mut self) -> Result<Value, Halt> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
        ) {
            self.pos += 1;
        }
        if self.at_end() {
            return Err(Halt::Eof);
        }
        self.src[start..self.pos]
            .parse::<Number>()
            .map(Value::Number)
            .map_err(|_| Halt::Malformed)
    }

    fn literal(&mut self, word: &str, value: Value) -> Result<Value, Halt> {
        let rest = &self.bytes[self.pos..];
        if rest.starts_with(word.as_bytes()) {
            self.pos += word.len();
            Ok(value)
        } else if word.as_bytes().starts_with(rest) {
            self.pos = self.bytes.len();
            Err(Halt::Eof)
        } else {
            Err(Halt::Malformed)
        }
    }
}
