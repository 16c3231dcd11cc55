//! SQL text rewriting: `?` placeholders and JDBC-style `{..}` escapes.
//!
//! SQL is otherwise opaque. The scanner only knows enough lexical structure
//! (quoted strings, dollar quotes, quoted identifiers, comments) to leave
//! literal text alone.

use crate::error::{Error, Result};

/// Rewrite `sql` for the extended protocol.
///
/// Escapes are translated first, so the leading `?` of `{? = call f(..)}`
/// never becomes a parameter. Remaining `?` marks are numbered `$1..$n`
/// left to right; `??` stands for a literal `?`.
pub fn rewrite(sql: &str) -> Result<String> {
    if !sql.contains(['?', '{']) {
        return Ok(sql.to_owned());
    }
    let translated = translate_escapes(sql)?;
    Ok(number_placeholders(&translated))
}

/// Number `?` placeholders without touching escapes.
pub fn number_placeholders(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() + 8);
    let mut next = 1_usize;
    let mut i = 0;
    while i < bytes.len() {
        if let Some(end) = literal_end(bytes, i) {
            out.extend_from_slice(&bytes[i..end]);
            i = end;
            continue;
        }
        if bytes[i] == b'?' {
            if bytes.get(i + 1) == Some(&b'?') {
                out.push(b'?');
                i += 2;
            } else {
                out.push(b'$');
                out.extend_from_slice(next.to_string().as_bytes());
                next += 1;
                i += 1;
            }
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    into_string(out)
}

/// Translate `{d ..}`, `{fn ..}`, `{call ..}` and friends into plain SQL.
pub fn translate_escapes(sql: &str) -> Result<String> {
    let bytes = sql.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if let Some(end) = literal_end(bytes, i) {
            out.extend_from_slice(&bytes[i..end]);
            i = end;
            continue;
        }
        if bytes[i] == b'{' {
            let close = matching_brace(bytes, i).ok_or_else(|| {
                Error::InvalidUsage(format!("unterminated escape at offset {} in SQL", i))
            })?;
            let body = into_string(bytes[i + 1..close].to_vec());
            let inner = translate_escapes(&body)?;
            out.extend_from_slice(translate_escape(&inner)?.as_bytes());
            i = close + 1;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    Ok(into_string(out))
}

fn translate_escape(body: &str) -> Result<String> {
    let body = body.trim();
    if let Some(rest) = body.strip_prefix('?') {
        let rest = rest.trim_start();
        let call = rest
            .strip_prefix('=')
            .map(str::trim_start)
            .and_then(|r| strip_keyword(r, "call"))
            .ok_or_else(|| Error::InvalidUsage(format!("malformed call escape: {{{}}}", body)))?;
        return Ok(select_from_call(call));
    }

    let split = body
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(body.len());
    let (keyword, rest) = body.split_at(split);
    let rest = rest.trim();
    let translated = match keyword.to_ascii_lowercase().as_str() {
        "d" => format!("DATE {}", rest),
        "t" => format!("TIME {}", rest),
        "ts" => format!("TIMESTAMP {}", rest),
        "escape" => format!("ESCAPE {}", rest),
        "limit" => format!("LIMIT {}", rest),
        "oj" => rest.to_owned(),
        "call" => select_from_call(rest),
        "fn" => translate_function(rest),
        _ => {
            return Err(Error::InvalidUsage(format!(
                "unknown escape keyword \"{}\"",
                keyword
            )));
        }
    };
    Ok(translated)
}

fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let head = s.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = s.get(keyword.len()..)?;
    if rest.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some(rest.trim_start())
}

fn select_from_call(call: &str) -> String {
    let call = call.trim();
    if call.contains('(') {
        format!("SELECT * FROM {}", call)
    } else {
        format!("SELECT * FROM {}()", call)
    }
}

/// Map a JDBC scalar function onto its PostgreSQL spelling.
fn translate_function(call: &str) -> String {
    let (name, args) = match call.find('(') {
        Some(open) if call.ends_with(')') => {
            let inner = &call[open + 1..call.len() - 1];
            (call[..open].trim(), split_args(inner))
        }
        _ => (call.trim(), Vec::new()),
    };
    let lower = name.to_ascii_lowercase();
    let joined = args.join(", ");

    let renamed = match lower.as_str() {
        "ucase" => Some("upper"),
        "lcase" => Some("lower"),
        "ceiling" => Some("ceil"),
        "log" => Some("ln"),
        "log10" => Some("log"),
        "rand" => Some("random"),
        "truncate" => Some("trunc"),
        "char" => Some("chr"),
        "ifnull" => Some("coalesce"),
        _ => None,
    };
    if let Some(pg) = renamed {
        return format!("{}({})", pg, joined);
    }

    let field = match lower.as_str() {
        "year" | "month" | "hour" | "minute" | "second" | "quarter" | "week" => Some(lower.as_str()),
        "dayofmonth" => Some("day"),
        "dayofyear" => Some("doy"),
        _ => None,
    };
    if let Some(field) = field {
        return format!("extract({} from {})", field, joined);
    }

    match lower.as_str() {
        "dayofweek" => format!("(extract(dow from {})+1)", joined),
        "locate" if args.len() == 2 => format!("position({} in {})", args[0], args[1]),
        "curdate" => "current_date".to_owned(),
        "curtime" => "current_time".to_owned(),
        "database" => "current_database()".to_owned(),
        "user" => "current_user".to_owned(),
        _ => format!("{}({})", name, joined),
    }
}

/// Split function arguments on top-level commas.
fn split_args(inner: &str) -> Vec<String> {
    let bytes = inner.as_bytes();
    let mut args = Vec::new();
    let mut depth = 0_i32;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if let Some(end) = literal_end(bytes, i) {
            i = end;
            continue;
        }
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b',' if depth == 0 => {
                args.push(inner[start..i].trim().to_owned());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    let last = inner[start..].trim();
    if !last.is_empty() || !args.is_empty() {
        args.push(last.to_owned());
    }
    args
}

fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0_usize;
    let mut i = open;
    while i < bytes.len() {
        if let Some(end) = literal_end(bytes, i) {
            i = end;
            continue;
        }
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// If a quoted string, quoted identifier, dollar quote or comment starts at
/// `i`, return the offset just past it. Unterminated tokens run to the end.
fn literal_end(bytes: &[u8], i: usize) -> Option<usize> {
    match bytes[i] {
        b'\'' => {
            let escaped = i > 0
                && matches!(bytes[i - 1], b'e' | b'E')
                && (i < 2 || !is_ident_byte(bytes[i - 2]));
            Some(quoted_end(bytes, i, b'\'', escaped))
        }
        b'"' => Some(quoted_end(bytes, i, b'"', false)),
        b'-' if bytes.get(i + 1) == Some(&b'-') => Some(
            memchr::memchr(b'\n', &bytes[i..]).map_or(bytes.len(), |nl| i + nl + 1),
        ),
        b'/' if bytes.get(i + 1) == Some(&b'*') => Some(block_comment_end(bytes, i)),
        b'$' if i == 0 || !is_ident_byte(bytes[i - 1]) => dollar_quote_end(bytes, i),
        _ => None,
    }
}

fn quoted_end(bytes: &[u8], open: usize, quote: u8, backslash: bool) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash && b == b'\\' {
            i += 2;
            continue;
        }
        if b == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn block_comment_end(bytes: &[u8], open: usize) -> usize {
    let mut depth = 0_usize;
    let mut i = open;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'/', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

/// `$tag$ .. $tag$`; `None` when the `$` does not open a dollar quote
/// (as in `$1`).
fn dollar_quote_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut j = open + 1;
    if let Some(&first) = bytes.get(j) {
        if first.is_ascii_digit() {
            return None;
        }
    }
    while j < bytes.len() && is_ident_byte(bytes[j]) {
        j += 1;
    }
    if bytes.get(j) != Some(&b'$') {
        return None;
    }
    let tag = &bytes[open..=j];
    let body_start = j + 1;
    let end = memchr::memmem::find(&bytes[body_start..], tag)
        .map_or(bytes.len(), |pos| body_start + pos + tag.len());
    Some(end)
}

fn into_string(bytes: Vec<u8>) -> String {
    // Splits only happen at ASCII delimiters, so the bytes stay valid UTF-8.
    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// True when the first keyword of `sql` is COPY.
pub fn is_copy_statement(sql: &str) -> bool {
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() || b == b'(' {
            i += 1;
            continue;
        }
        if (b == b'-' && bytes.get(i + 1) == Some(&b'-'))
            || (b == b'/' && bytes.get(i + 1) == Some(&b'*'))
        {
            i = literal_end(bytes, i).unwrap_or(bytes.len());
            continue;
        }
        break;
    }
    let word = &bytes[i..];
    word.len() >= 4
        && word[..4].eq_ignore_ascii_case(b"copy")
        && word.get(4).is_none_or(|b| !is_ident_byte(*b))
}

/// Quote an identifier for interpolation, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for interpolation.
///
/// Backslashes force the `E''` form so the result means the same thing
/// whatever `standard_conforming_strings` is set to.
pub fn quote_literal(value: &str) -> String {
    let doubled = value.replace('\'', "''");
    if value.contains('\\') {
        format!("E'{}'", doubled.replace('\\', "\\\\"))
    } else {
        format!("'{}'", doubled)
    }
}
