//! Arrays of any element type, in any number of dimensions.
//!
//! Binary layout:
//! `int32 ndim; int32 has_nulls; int32 element_oid; {int32 len; int32 lower}×ndim;`
//! then each element as `int32 length` + bytes, or -1 for NULL, in row-major order.

use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};

use super::super::registry::TypeRegistry;
use super::super::value::Value;
use super::{Reader, Scanner, push_quoted, write_nested};

/// The server rejects arrays with more dimensions than this.
const MAX_DIMS: usize = 6;

/// One array dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dim {
    pub len: i32,
    pub lower: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    pub element_oid: Oid,
    /// Empty for an empty array.
    pub dims: Vec<Dim>,
    /// Row-major; `None` is SQL NULL.
    pub elements: Vec<Option<Value>>,
}

impl Array {
    /// A one-dimensional array with lower bound 1.
    pub fn from_elements(element_oid: Oid, elements: Vec<Option<Value>>) -> Self {
        let dims = if elements.is_empty() {
            Vec::new()
        } else {
            vec![Dim {
                len: elements.len() as i32,
                lower: 1,
            }]
        };
        Self {
            element_oid,
            dims,
            elements,
        }
    }

    /// A multi-dimensional array; the element count must match the dimensions.
    pub fn new(element_oid: Oid, dims: Vec<Dim>, elements: Vec<Option<Value>>) -> Result<Self> {
        check_shape(&dims, elements.len())?;
        Ok(Self {
            element_oid,
            dims,
            elements,
        })
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn decode_binary(registry: &TypeRegistry, bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "array");
        let ndim = r.i32()?;
        let _has_nulls = r.i32()?;
        let element_oid = r.u32()?;
        if ndim < 0 || ndim as usize > MAX_DIMS {
            return Err(Error::Decode(format!("invalid array dimension count {}", ndim)));
        }
        let mut dims = Vec::with_capacity(ndim as usize);
        for _ in 0..ndim {
            let len = r.i32()?;
            let lower = r.i32()?;
            dims.push(Dim { len, lower });
        }
        let count = check_shape(&dims, usize::MAX)?;
        let mut elements = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let element = match r.field()? {
                Some(raw) => Some(registry.decode(element_oid, FormatCode::Binary, raw)?),
                None => None,
            };
            elements.push(element);
        }
        r.finish()?;
        Ok(Self {
            element_oid,
            dims,
            elements,
        })
    }

    /// Parse `{...}` text, optionally preceded by `[l:u]...=` bound decoration.
    pub fn decode_text(
        registry: &TypeRegistry,
        element_oid: Oid,
        delimiter: char,
        text: &str,
    ) -> Result<Self> {
        let mut scan = Scanner::new(text.trim());
        let explicit = parse_bounds(&mut scan)?;

        let mut parser = TextParser {
            registry,
            element_oid,
            delimiter,
            lens: Vec::new(),
            leaf_depth: None,
            elements: Vec::new(),
        };
        parser.level(&mut scan, 0)?;
        scan.skip_whitespace();
        if !scan.is_eof() {
            return Err(scan.error("trailing characters after array"));
        }

        let lens: Vec<i32> = parser.lens.iter().flatten().copied().collect();
        let dims: Vec<Dim> = if parser.elements.is_empty() {
            Vec::new()
        } else {
            match explicit {
                Some(bounds) => {
                    if bounds.len() != lens.len()
                        || bounds.iter().zip(&lens).any(|(b, len)| b.len != *len)
                    {
                        return Err(Error::Decode(format!(
                            "array bounds do not match contents: {:?}",
                            text
                        )));
                    }
                    bounds
                }
                None => lens.iter().map(|len| Dim { len: *len, lower: 1 }).collect(),
            }
        };
        Array::new(element_oid, dims, parser.elements)
    }

    pub fn write_binary(&self, buf: &mut Vec<u8>) -> Result<()> {
        check_shape(&self.dims, self.elements.len())?;
        let has_nulls = self.elements.iter().any(Option::is_none);
        buf.extend_from_slice(&(self.dims.len() as i32).to_be_bytes());
        buf.extend_from_slice(&(has_nulls as i32).to_be_bytes());
        buf.extend_from_slice(&self.element_oid.to_be_bytes());
        for dim in &self.dims {
            buf.extend_from_slice(&dim.len.to_be_bytes());
            buf.extend_from_slice(&dim.lower.to_be_bytes());
        }
        for element in &self.elements {
            match element {
                Some(v) => write_nested(buf, |b| v.write_binary(self.element_oid, b))?,
                None => buf.extend_from_slice(&(-1_i32).to_be_bytes()),
            }
        }
        Ok(())
    }

    fn write_level(&self, out: &mut String, depth: usize, offset: &mut usize) {
        out.push('{');
        let len = self.dims[depth].len.max(0) as usize;
        for i in 0..len {
            if i > 0 {
                out.push(',');
            }
            if depth + 1 < self.dims.len() {
                self.write_level(out, depth + 1, offset);
            } else {
                match self.elements.get(*offset).and_then(Option::as_ref) {
                    Some(v) => push_quoted(out, &v.to_string()),
                    None => out.push_str("NULL"),
                }
                *offset += 1;
            }
        }
        out.push('}');
    }
}

/// `int2vector` and `oidvector`: one-dimensional, zero-based, never NULL.
/// Text is the elements separated by spaces.
impl Array {
    pub fn decode_vector_text(registry: &TypeRegistry, element_oid: Oid, text: &str) -> Result<Self> {
        let elements = text
            .split_whitespace()
            .map(|token| {
                registry
                    .decode(element_oid, FormatCode::Text, token.as_bytes())
                    .map(Some)
            })
            .collect::<Result<Vec<_>>>()?;
        if elements.is_empty() {
            return Ok(Self::from_elements(element_oid, elements));
        }
        let dims = vec![Dim {
            len: elements.len() as i32,
            lower: 0,
        }];
        Self::new(element_oid, dims, elements)
    }

    /// Whether the server accepts this array as a vector in binary.
    pub fn is_vector_shaped(&self) -> bool {
        self.dims.len() == 1 && self.elements.iter().all(Option::is_some)
    }

    pub fn write_vector_binary(&self, buf: &mut Vec<u8>) -> Result<()> {
        let vector = Self {
            element_oid: self.element_oid,
            dims: self.dims.iter().map(|d| Dim { len: d.len, lower: 0 }).collect(),
            elements: self.elements.clone(),
        };
        vector.write_binary(buf)
    }

    pub fn vector_text(&self) -> String {
        self.elements
            .iter()
            .flatten()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Array-literal text. Elements are always quoted, which every element type accepts.
impl fmt::Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dims.is_empty() {
            return f.write_str("{}");
        }
        if self.dims.iter().any(|d| d.lower != 1) {
            for dim in &self.dims {
                write!(f, "[{}:{}]", dim.lower, dim.lower + dim.len - 1)?;
            }
            f.write_str("=")?;
        }
        let mut out = String::new();
        self.write_level(&mut out, 0, &mut 0);
        f.write_str(&out)
    }
}

/// Validate dimensions and return the element count they imply.
fn check_shape(dims: &[Dim], actual: usize) -> Result<usize> {
    if dims.len() > MAX_DIMS {
        return Err(Error::Decode(format!("too many array dimensions: {}", dims.len())));
    }
    if dims.is_empty() {
        return if actual == 0 || actual == usize::MAX {
            Ok(0)
        } else {
            Err(Error::Encode("elements given for a zero-dimensional array".into()))
        };
    }
    let mut count: usize = 1;
    for dim in dims {
        if dim.len < 0 {
            return Err(Error::Decode(format!("negative array dimension {}", dim.len)));
        }
        count = count
            .checked_mul(dim.len as usize)
            .ok_or_else(|| Error::Decode("array too large".into()))?;
    }
    if actual != usize::MAX && actual != count {
        return Err(Error::Encode(format!(
            "array dimensions imply {} elements but {} were given",
            count, actual
        )));
    }
    Ok(count)
}

/// `[1:3][0:1]=` prefix, if present.
fn parse_bounds(scan: &mut Scanner<'_>) -> Result<Option<Vec<Dim>>> {
    if scan.peek() != Some('[') {
        return Ok(None);
    }
    let mut dims = Vec::new();
    while scan.eat('[') {
        let (range, _) = scan.unquoted(&[']'])?;
        scan.expect(']')?;
        let (lower, upper) = range
            .split_once(':')
            .ok_or_else(|| scan.error("invalid array bound"))?;
        let lower: i32 = lower.trim().parse().map_err(|_| scan.error("invalid array bound"))?;
        let upper: i32 = upper.trim().parse().map_err(|_| scan.error("invalid array bound"))?;
        if upper < lower - 1 {
            return Err(scan.error("invalid array bound"));
        }
        dims.push(Dim {
            len: upper - lower + 1,
            lower,
        });
    }
    scan.skip_whitespace();
    scan.expect('=')?;
    scan.skip_whitespace();
    Ok(Some(dims))
}

struct TextParser<'r> {
    registry: &'r TypeRegistry,
    element_oid: Oid,
    delimiter: char,
    /// Length of each dimension, fixed by the first sub-array completed at that depth.
    lens: Vec<Option<i32>>,
    leaf_depth: Option<usize>,
    elements: Vec<Option<Value>>,
}

impl TextParser<'_> {
    fn level(&mut self, scan: &mut Scanner<'_>, depth: usize) -> Result<()> {
        if depth >= MAX_DIMS {
            return Err(scan.error("too many array dimensions"));
        }
        scan.skip_whitespace();
        scan.expect('{')?;
        scan.skip_whitespace();
        if scan.eat('}') {
            // `{}` is only valid as the whole array.
            return if depth == 0 {
                Ok(())
            } else {
                Err(scan.error("empty sub-array"))
            };
        }

        let mut count = 0i32;
        loop {
            scan.skip_whitespace();
            if scan.peek() == Some('{') {
                self.level(scan, depth + 1)?;
            } else {
                match self.leaf_depth {
                    Some(d) if d != depth => return Err(scan.error("mixed array nesting")),
                    _ => self.leaf_depth = Some(depth),
                }
                self.element(scan)?;
            }
            count += 1;
            scan.skip_whitespace();
            if scan.eat(self.delimiter) {
                continue;
            }
            scan.expect('}')?;
            break;
        }

        if self.lens.len() <= depth {
            self.lens.resize(depth + 1, None);
        }
        match self.lens[depth] {
            Some(len) if len != count => Err(scan.error("ragged multi-dimensional array")),
            Some(_) => Ok(()),
            None => {
                self.lens[depth] = Some(count);
                Ok(())
            }
        }
    }

    fn element(&mut self, scan: &mut Scanner<'_>) -> Result<()> {
        let value = if scan.peek() == Some('"') {
            let text = scan.quoted(false)?;
            Some(self.decode(&text)?)
        } else {
            let (token, escaped) = scan.unquoted(&[self.delimiter, '}'])?;
            let token = token.trim_end();
            if token.is_empty() {
                return Err(scan.error("empty array element"));
            }
            if !escaped && token.eq_ignore_ascii_case("NULL") {
                None
            } else {
                Some(self.decode(token)?)
            }
        };
        self.elements.push(value);
        Ok(())
    }

    fn decode(&self, text: &str) -> Result<Value> {
        self.registry
            .decode(self.element_oid, FormatCode::Text, text.as_bytes())
    }
}

/// Array type OID for a built-in element type.
pub fn builtin_array_oid(element: Oid) -> Option<Oid> {
    Some(match element {
        oid::BOOL => oid::BOOL_ARRAY,
        oid::BYTEA => oid::BYTEA_ARRAY,
        oid::CHAR => oid::CHAR_ARRAY,
        oid::NAME => oid::NAME_ARRAY,
        oid::INT2 => oid::INT2_ARRAY,
        oid::INT4 => oid::INT4_ARRAY,
        oid::INT8 => oid::INT8_ARRAY,
        oid::TEXT => oid::TEXT_ARRAY,
        oid::TID => oid::TID_ARRAY,
        oid::BPCHAR => oid::BPCHAR_ARRAY,
        oid::VARCHAR => oid::VARCHAR_ARRAY,
        oid::OID => oid::OID_ARRAY,
        oid::POINT => oid::POINT_ARRAY,
        oid::LSEG => oid::LSEG_ARRAY,
        oid::PATH => oid::PATH_ARRAY,
        oid::BOX => oid::BOX_ARRAY,
        oid::POLYGON => oid::POLYGON_ARRAY,
        oid::CIRCLE => oid::CIRCLE_ARRAY,
        oid::LINE => oid::LINE_ARRAY,
        oid::MONEY => oid::MONEY_ARRAY,
        oid::BIT => oid::BIT_ARRAY,
        oid::VARBIT => oid::VARBIT_ARRAY,
        oid::INT2VECTOR => oid::INT2VECTOR_ARRAY,
        oid::OIDVECTOR => oid::OIDVECTOR_ARRAY,
        oid::FLOAT4 => oid::FLOAT4_ARRAY,
        oid::FLOAT8 => oid::FLOAT8_ARRAY,
        oid::MACADDR => oid::MACADDR_ARRAY,
        oid::INET => oid::INET_ARRAY,
        oid::CIDR => oid::CIDR_ARRAY,
        oid::DATE => oid::DATE_ARRAY,
        oid::TIME => oid::TIME_ARRAY,
        oid::TIMETZ => oid::TIMETZ_ARRAY,
        oid::TIMESTAMP => oid::TIMESTAMP_ARRAY,
        oid::TIMESTAMPTZ => oid::TIMESTAMPTZ_ARRAY,
        oid::INTERVAL => oid::INTERVAL_ARRAY,
        oid::NUMERIC => oid::NUMERIC_ARRAY,
        oid::UUID => oid::UUID_ARRAY,
        oid::JSON => oid::JSON_ARRAY,
        oid::JSONB => oid::JSONB_ARRAY,
        oid::XML => oid::XML_ARRAY,
        oid::RECORD => oid::RECORD_ARRAY,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry {
        TypeRegistry::default()
    }

    fn binary(array: &Array) -> Vec<u8> {
        let mut buf = Vec::new();
        array.write_binary(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_int_array_binary_layout() {
        let array = Array::from_elements(oid::INT4, vec![Some(Value::Int4(1)), Some(Value::Int4(2))]);
        let bytes = binary(&array);
        let mut expected = Vec::new();
        for v in [1i32, 0, oid::INT4 as i32, 2, 1, 4, 1, 4, 2] {
            expected.extend_from_slice(&v.to_be_bytes());
        }
        assert_eq!(bytes, expected);
        assert_eq!(Array::decode_binary(&registry(), &bytes).unwrap(), array);
    }

    #[test]
    fn test_null_positions_preserved() {
        let array = Array::from_elements(oid::TEXT, vec![None, Some(Value::Text("x".into()))]);
        let reg = registry();
        let decoded = Array::decode_binary(&reg, &binary(&array)).unwrap();
        assert_eq!(decoded, array);
        let text = array.to_string();
        assert_eq!(text, r#"{NULL,"x"}"#);
        assert_eq!(Array::decode_text(&reg, oid::TEXT, ',', &text).unwrap(), array);
    }

    #[test]
    fn test_multi_dimensional_text() {
        let reg = registry();
        let array = Array::decode_text(&reg, oid::INT4, ',', "{{1,2,3},{4,5,6}}").unwrap();
        assert_eq!(array.dims, vec![Dim { len: 2, lower: 1 }, Dim { len: 3, lower: 1 }]);
        assert_eq!(array.elements[4], Some(Value::Int4(5)));
        assert_eq!(Array::decode_binary(&reg, &binary(&array)).unwrap(), array);
        assert_eq!(array.to_string(), r#"{{"1","2","3"},{"4","5","6"}}"#);
        assert!(Array::decode_text(&reg, oid::INT4, ',', "{{1,2},{3}}").is_err());
    }

    #[test]
    fn test_bounds_and_empty() {
        let reg = registry();
        let array = Array::decode_text(&reg, oid::INT4, ',', "[0:1]={7,8}").unwrap();
        assert_eq!(array.dims, vec![Dim { len: 2, lower: 0 }]);
        assert_eq!(array.to_string(), r#"[0:1]={"7","8"}"#);
        let empty = Array::decode_text(&reg, oid::INT4, ',', "{}").unwrap();
        assert!(empty.dims.is_empty());
        assert_eq!(empty.to_string(), "{}");
        assert_eq!(Array::decode_binary(&reg, &binary(&empty)).unwrap(), empty);
    }

    #[test]
    fn test_quoted_and_null_text_elements() {
        let reg = registry();
        let array =
            Array::decode_text(&reg, oid::TEXT, ',', r#"{"a,b","say \"hi\"",NULL,"NULL"}"#).unwrap();
        assert_eq!(
            array.elements,
            vec![
                Some(Value::Text("a,b".into())),
                Some(Value::Text("say \"hi\"".into())),
                None,
                Some(Value::Text("NULL".into())),
            ]
        );
    }

    #[test]
    fn test_box_delimiter() {
        let reg = registry();
        let array = Array::decode_text(&reg, oid::BOX, ';', "{(1,1),(0,0);(2,2),(1,1)}").unwrap();
        assert_eq!(array.elements.len(), 2);
    }

    #[test]
    fn test_vector_forms() {
        let reg = registry();
        let vector = Array::decode_vector_text(&reg, oid::INT2, "1 3 -2").unwrap();
        assert_eq!(vector.dims, vec![Dim { len: 3, lower: 0 }]);
        assert_eq!(vector.vector_text(), "1 3 -2");

        let one_based = Array::from_elements(oid::INT2, vector.elements.clone());
        assert!(one_based.is_vector_shaped());
        let mut buf = Vec::new();
        one_based.write_vector_binary(&mut buf).unwrap();
        assert_eq!(Array::decode_binary(&reg, &buf).unwrap(), vector);

        assert!(Array::decode_vector_text(&reg, oid::OID, "").unwrap().dims.is_empty());
        assert!(Array::decode_vector_text(&reg, oid::OID, "1 x").is_err());
    }

    #[test]
    fn test_shape_mismatch() {
        assert!(Array::new(oid::INT4, vec![Dim { len: 2, lower: 1 }], vec![None]).is_err());
    }
}
