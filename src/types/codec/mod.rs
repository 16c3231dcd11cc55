//! Built-in codecs: one binary + text pair per scalar family, plus the
//! generic array, composite and range codecs.

pub mod array;
pub mod bits;
pub mod composite;
pub mod datetime;
pub mod geometric;
pub mod hstore;
pub mod interval;
pub mod money;
pub mod network;
pub mod numeric;
pub mod scalar;
pub mod range;

use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid};

use super::registry::TypeRegistry;
use super::value::Value;

/// A user-supplied codec, registered on a [`TypeDescriptor`](super::TypeDescriptor).
///
/// Plugins take precedence over the descriptor's category, so a composite type
/// can be mapped to any [`Value`] shape the application prefers.
pub trait Codec: Send + Sync + fmt::Debug {
    fn decode(
        &self,
        registry: &TypeRegistry,
        oid: Oid,
        format: FormatCode,
        bytes: &[u8],
    ) -> Result<Value>;

    /// Append the encoded value (without length prefix).
    fn encode(
        &self,
        registry: &TypeRegistry,
        value: &Value,
        oid: Oid,
        format: FormatCode,
        buf: &mut Vec<u8>,
    ) -> Result<()>;

    fn supports_binary(&self) -> bool {
        true
    }
}

/// Big-endian cursor over a value payload. Short input is a decode error.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    what: &'static str,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, what }
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.buf.len() < len {
            return Err(Error::Decode(format!("truncated {} value", self.what)));
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn i16(&mut self) -> Result<i16> {
        self.array().map(i16::from_be_bytes)
    }

    pub fn u16(&mut self) -> Result<u16> {
        self.array().map(u16::from_be_bytes)
    }

    pub fn i32(&mut self) -> Result<i32> {
        self.array().map(i32::from_be_bytes)
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.array().map(u32::from_be_bytes)
    }

    pub fn i64(&mut self) -> Result<i64> {
        self.array().map(i64::from_be_bytes)
    }

    pub fn f64(&mut self) -> Result<f64> {
        self.array().map(f64::from_be_bytes)
    }

    /// A length-prefixed field; `None` for a -1 length.
    pub fn field(&mut self) -> Result<Option<&'a [u8]>> {
        match self.i32()? {
            -1 => Ok(None),
            len if len < 0 => Err(Error::Decode(format!(
                "negative field length {} in {} value",
                len, self.what
            ))),
            len => self.bytes(len as usize).map(Some),
        }
    }

    pub fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    pub fn finish(self) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(Error::Decode(format!("trailing bytes after {} value", self.what)))
        }
    }
}

/// Payload as UTF-8.
pub(crate) fn utf8(bytes: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))
}

/// Append a length-prefixed field; `None` writes the NULL marker.
pub(crate) fn write_field(buf: &mut Vec<u8>, value: Option<&[u8]>) {
    match value {
        Some(bytes) => {
            buf.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
            buf.extend_from_slice(bytes);
        }
        None => buf.extend_from_slice(&(-1_i32).to_be_bytes()),
    }
}

/// Write a length placeholder, run `f`, then patch in the byte count.
pub(crate) fn write_nested(
    buf: &mut Vec<u8>,
    f: impl FnOnce(&mut Vec<u8>) -> Result<()>,
) -> Result<()> {
    let start = buf.len();
    buf.extend_from_slice(&[0; 4]);
    f(buf)?;
    let len = i32::try_from(buf.len() - start - 4)
        .map_err(|_| Error::Encode("value too large".into()))?;
    buf[start..start + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

/// Double-quote `s` with backslash escapes, as array and record input accept.
pub(crate) fn push_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

/// Character cursor shared by the array, record, range and hstore text parsers.
pub(crate) struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    pub fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    pub fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    pub fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    pub fn expect(&mut self, expected: char) -> Result<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {:?}", expected)))
        }
    }

    pub fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek().filter(|c| c.is_whitespace()) {
            self.pos += c.len_utf8();
        }
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    pub fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    pub fn advance(&mut self, len: usize) {
        self.pos = (self.pos + len).min(self.src.len());
    }

    /// Read a quoted token; the opening quote must be next. Backslash escapes
    /// the next character. With `doubled`, `""` inside the quotes is a literal
    /// quote (record and range syntax).
    pub fn quoted(&mut self, doubled: bool) -> Result<String> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated quoted string")),
                Some('\\') => match self.bump() {
                    Some(c) => out.push(c),
                    None => return Err(self.error("dangling escape")),
                },
                Some('"') if doubled && self.peek() == Some('"') => {
                    self.pos += 1;
                    out.push('"');
                }
                Some('"') => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    /// Read an unquoted token up to one of `stops` (exclusive), honoring
    /// backslash escapes. Returns the token and whether it was escaped.
    pub fn unquoted(&mut self, stops: &[char]) -> Result<(String, bool)> {
        let mut out = String::new();
        let mut escaped = false;
        while let Some(c) = self.peek() {
            if stops.contains(&c) {
                break;
            }
            self.pos += c.len_utf8();
            if c == '\\' {
                escaped = true;
                match self.bump() {
                    Some(next) => out.push(next),
                    None => return Err(self.error("dangling escape")),
                }
            } else {
                out.push(c);
            }
        }
        Ok((out, escaped))
    }

    pub fn error(&self, msg: &str) -> Error {
        Error::Decode(format!("{} at offset {} in {:?}", msg, self.pos, self.src))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_field() {
        let data = [0, 0, 0, 2, b'h', b'i', 0xff, 0xff, 0xff, 0xff];
        let mut r = Reader::new(&data, "test");
        assert_eq!(r.field().unwrap(), Some(&b"hi"[..]));
        assert_eq!(r.field().unwrap(), None);
        r.finish().unwrap();
    }

    #[test]
    fn test_reader_truncated() {
        let mut r = Reader::new(&[0, 0, 0, 5, 1], "test");
        assert!(matches!(r.field(), Err(Error::Decode(_))));
    }

    #[test]
    fn test_write_nested() {
        let mut buf = vec![9];
        write_nested(&mut buf, |b| {
            b.extend_from_slice(b"abc");
            Ok(())
        })
        .unwrap();
        assert_eq!(buf, vec![9, 0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_scanner_quoted() {
        let mut s = Scanner::new(r#""a\"b""c",x"#);
        assert_eq!(s.quoted(true).unwrap(), "a\"b\"c");
        assert!(s.eat(','));
        let mut s = Scanner::new(r#""",rest"#);
        assert_eq!(s.quoted(false).unwrap(), "");
        assert_eq!(s.rest(), ",rest");
    }

    #[test]
    fn test_push_quoted() {
        let mut out = String::new();
        push_quoted(&mut out, r#"say "hi" \o/"#);
        assert_eq!(out, r#""say \"hi\" \\o/""#);
    }
}
