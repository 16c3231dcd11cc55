//! The `hstore` extension type: an unordered map of text keys to nullable text values.
//!
//! hstore has no fixed OID; the registry binds this codec to whatever OID the
//! catalog reports for a type named `hstore`.

use crate::error::{Error, Result};

use super::{Reader, Scanner, push_quoted, utf8, write_field};

pub type Hstore = Vec<(String, Option<String>)>;

/// Binary: pair count, then per pair a key field and a value field (-1 for NULL).
pub fn from_binary(bytes: &[u8]) -> Result<Hstore> {
    let mut r = Reader::new(bytes, "hstore");
    let count = r.i32()?;
    if count < 0 {
        return Err(Error::Decode("negative hstore pair count".into()));
    }
    let mut pairs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let key = r
            .field()?
            .ok_or_else(|| Error::Decode("NULL hstore key".into()))?;
        let value = r.field()?.map(utf8).transpose()?.map(str::to_owned);
        pairs.push((utf8(key)?.to_owned(), value));
    }
    r.finish()?;
    Ok(pairs)
}

pub fn write_binary(pairs: &[(String, Option<String>)], buf: &mut Vec<u8>) {
    buf.extend_from_slice(&(pairs.len() as i32).to_be_bytes());
    for (key, value) in pairs {
        write_field(buf, Some(key.as_bytes()));
        write_field(buf, value.as_deref().map(str::as_bytes));
    }
}

/// Text: `"k"=>"v", "n"=>NULL`. Keys and values may also appear unquoted.
pub fn parse(s: &str) -> Result<Hstore> {
    let mut scan = Scanner::new(s);
    let mut pairs = Vec::new();
    loop {
        scan.skip_whitespace();
        if scan.is_eof() {
            break;
        }
        let key = token(&mut scan)?.ok_or_else(|| scan.error("NULL hstore key"))?;
        scan.skip_whitespace();
        scan.expect('=')?;
        scan.expect('>')?;
        scan.skip_whitespace();
        let value = token(&mut scan)?;
        pairs.push((key, value));
        scan.skip_whitespace();
        if !scan.eat(',') {
            break;
        }
    }
    scan.skip_whitespace();
    if !scan.is_eof() {
        return Err(scan.error("unexpected trailing input"));
    }
    Ok(pairs)
}

/// One key or value; unquoted `NULL` (any case) is SQL NULL.
fn token(scan: &mut Scanner<'_>) -> Result<Option<String>> {
    if scan.peek() == Some('"') {
        return scan.quoted(false).map(Some);
    }
    let (word, escaped) = scan.unquoted(&[',', '=', ' ', '\t', '\n'])?;
    if word.is_empty() {
        return Err(scan.error("empty hstore token"));
    }
    if !escaped && word.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    Ok(Some(word))
}

pub fn format(pairs: &[(String, Option<String>)]) -> String {
    let mut out = String::new();
    for (i, (key, value)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        push_quoted(&mut out, key);
        out.push_str("=>");
        match value {
            Some(v) => push_quoted(&mut out, v),
            None => out.push_str("NULL"),
        }
    }
    out
}
