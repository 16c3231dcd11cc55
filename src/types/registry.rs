//! OID-keyed type descriptors and dynamic decoding.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};

use super::codec::array::Array;
use super::codec::composite::Composite;
use super::codec::range::Range;
use super::codec::scalar::Builtin;
use super::codec::{Codec, utf8};
use super::value::Value;

/// Domain chains and nested type references deeper than this are rejected.
const MAX_TYPE_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Scalar,
    Array,
    Composite,
    Enum,
    Range,
    Domain,
}

/// One attribute of a composite type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub oid: Oid,
}

#[derive(Debug, Clone)]
pub enum CodecRef {
    Builtin(Builtin),
    /// A user-registered codec; takes precedence over structural decoding.
    Plugin(Arc<dyn Codec>),
    /// Arrays, composites, enums, ranges and domains decode from the descriptor.
    Structural,
}

#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub oid: Oid,
    pub name: String,
    pub category: TypeCategory,
    pub element_oid: Oid,
    pub fields: Vec<Field>,
    pub base_oid: Oid,
    pub range_subtype: Oid,
    /// Array element delimiter of this type (`;` for box, `,` otherwise).
    pub delimiter: char,
    pub codec: CodecRef,
}

impl TypeDescriptor {
    fn blank(oid: Oid, name: &str, category: TypeCategory, codec: CodecRef) -> Self {
        Self {
            oid,
            name: name.to_owned(),
            category,
            element_oid: 0,
            fields: Vec::new(),
            base_oid: 0,
            range_subtype: 0,
            delimiter: ',',
            codec,
        }
    }

    pub fn scalar(oid: Oid, name: &str, builtin: Builtin) -> Self {
        let mut desc = Self::blank(oid, name, TypeCategory::Scalar, CodecRef::Builtin(builtin));
        if builtin == Builtin::Box {
            desc.delimiter = ';';
        }
        desc
    }

    pub fn array(oid: Oid, name: &str, element_oid: Oid) -> Self {
        Self {
            element_oid,
            ..Self::blank(oid, name, TypeCategory::Array, CodecRef::Structural)
        }
    }

    pub fn composite(oid: Oid, name: &str, fields: Vec<Field>) -> Self {
        Self {
            fields,
            ..Self::blank(oid, name, TypeCategory::Composite, CodecRef::Structural)
        }
    }

    pub fn enumeration(oid: Oid, name: &str) -> Self {
        Self::blank(oid, name, TypeCategory::Enum, CodecRef::Structural)
    }

    pub fn range(oid: Oid, name: &str, subtype: Oid) -> Self {
        Self {
            range_subtype: subtype,
            ..Self::blank(oid, name, TypeCategory::Range, CodecRef::Structural)
        }
    }

    pub fn domain(oid: Oid, name: &str, base_oid: Oid) -> Self {
        Self {
            base_oid,
            ..Self::blank(oid, name, TypeCategory::Domain, CodecRef::Structural)
        }
    }

    /// Replace the codec with a user plugin.
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = CodecRef::Plugin(codec);
        self
    }
}

/// Session settings that change how text values look.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSettings {
    pub date_style: String,
    pub interval_style: String,
    pub integer_datetimes: bool,
}

impl Default for FormatSettings {
    fn default() -> Self {
        Self {
            date_style: "ISO, MDY".into(),
            interval_style: "postgres".into(),
            integer_datetimes: true,
        }
    }
}

impl FormatSettings {
    /// Apply a ParameterStatus update. Returns true if a setting changed.
    pub fn apply(&mut self, name: &str, value: &str) -> bool {
        let slot = match name {
            "DateStyle" => &mut self.date_style,
            "IntervalStyle" => &mut self.interval_style,
            "integer_datetimes" => {
                let on = value == "on";
                let changed = self.integer_datetimes != on;
                self.integer_datetimes = on;
                return changed;
            }
            _ => return false,
        };
        if slot == value {
            return false;
        }
        *slot = value.to_owned();
        true
    }

    pub fn iso_dates(&self) -> bool {
        self.date_style
            .split(',')
            .next()
            .is_some_and(|s| s.trim().eq_ignore_ascii_case("ISO"))
    }
}

/// One row of [`catalog_type_query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogType {
    pub oid: Oid,
    pub name: String,
    /// `typtype`: b, c, d, e, m, p or r
    pub kind: char,
    /// `typcategory`; `A` marks arrays
    pub category: char,
    pub element_oid: Oid,
    pub base_oid: Oid,
    pub delimiter: char,
    pub relid: Oid,
    pub range_subtype: Oid,
}

impl CatalogType {
    /// Parse a text-format result row.
    pub fn from_text_row(row: &[Option<&str>]) -> Result<Self> {
        let [oid, name, kind, category, elem, base, delim, relid, subtype] = row else {
            return Err(Error::Protocol(format!(
                "pg_type row has {} columns, expected 9",
                row.len()
            )));
        };
        Ok(Self {
            oid: parse_oid(*oid)?,
            name: name.unwrap_or_default().to_owned(),
            kind: first_char(*kind)?,
            category: first_char(*category)?,
            element_oid: parse_oid(*elem)?,
            base_oid: parse_oid(*base)?,
            delimiter: first_char(*delim).unwrap_or(','),
            relid: parse_oid(*relid)?,
            range_subtype: parse_oid(*subtype)?,
        })
    }
}

/// One row of [`catalog_attribute_query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogAttribute {
    pub relid: Oid,
    pub name: String,
    pub type_oid: Oid,
}

impl CatalogAttribute {
    pub fn from_text_row(row: &[Option<&str>]) -> Result<Self> {
        let [relid, name, type_oid] = row else {
            return Err(Error::Protocol(format!(
                "pg_attribute row has {} columns, expected 3",
                row.len()
            )));
        };
        Ok(Self {
            relid: parse_oid(*relid)?,
            name: name.unwrap_or_default().to_owned(),
            type_oid: parse_oid(*type_oid)?,
        })
    }
}

fn parse_oid(s: Option<&str>) -> Result<Oid> {
    match s {
        None => Ok(0),
        Some(s) => s
            .parse()
            .map_err(|_| Error::Protocol(format!("invalid OID in catalog row: {:?}", s))),
    }
}

fn first_char(s: Option<&str>) -> Result<char> {
    s.and_then(|s| s.chars().next())
        .ok_or_else(|| Error::Protocol("empty char column in catalog row".into()))
}

fn oid_list(oids: &[Oid]) -> String {
    oids.iter()
        .map(Oid::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// `pg_type` (joined with `pg_range`) rows for the given OIDs.
pub fn catalog_type_query(oids: &[Oid]) -> String {
    format!(
        "SELECT t.oid, t.typname, t.typtype, t.typcategory, t.typelem, t.typbasetype, \
         t.typdelim, t.typrelid, COALESCE(r.rngsubtype, 0) \
         FROM pg_catalog.pg_type t LEFT JOIN pg_catalog.pg_range r ON r.rngtypid = t.oid \
         WHERE t.oid IN ({})",
        oid_list(oids)
    )
}

/// Live attributes of the given composite relations, in column order.
pub fn catalog_attribute_query(relids: &[Oid]) -> String {
    format!(
        "SELECT a.attrelid, a.attname, a.atttypid FROM pg_catalog.pg_attribute a \
         WHERE a.attrelid IN ({}) AND a.attnum > 0 AND NOT a.attisdropped \
         ORDER BY a.attrelid, a.attnum",
        oid_list(relids)
    )
}

/// Maps type OIDs to descriptors and decodes values through them.
///
/// Shared between connections to the same server through
/// [`SharedRegistryCache`](super::shared::SharedRegistryCache); descriptors
/// are added behind a lock, while [`FormatSettings`] are fixed per registry.
#[derive(Debug)]
pub struct TypeRegistry {
    types: RwLock<HashMap<Oid, Arc<TypeDescriptor>>>,
    settings: FormatSettings,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new(FormatSettings::default())
    }
}

impl TypeRegistry {
    /// A registry holding the built-in types.
    pub fn new(settings: FormatSettings) -> Self {
        let mut types = HashMap::new();
        for desc in builtin_descriptors() {
            types.insert(desc.oid, Arc::new(desc));
        }
        Self {
            types: RwLock::new(types),
            settings,
        }
    }

    /// The built-in types with default settings, used for static decoding.
    pub fn builtin() -> &'static TypeRegistry {
        static BUILTIN: OnceLock<TypeRegistry> = OnceLock::new();
        BUILTIN.get_or_init(TypeRegistry::default)
    }

    pub fn settings(&self) -> &FormatSettings {
        &self.settings
    }

    /// A private copy with different settings and the same descriptors.
    pub fn fork(&self, settings: FormatSettings) -> Self {
        let types = self.types.read().unwrap_or_else(PoisonError::into_inner).clone();
        Self {
            types: RwLock::new(types),
            settings,
        }
    }

    pub fn register(&self, desc: TypeDescriptor) {
        tracing::debug!(oid = desc.oid, name = %desc.name, "register type");
        self.types
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(desc.oid, Arc::new(desc));
    }

    pub fn lookup(&self, oid: Oid) -> Option<Arc<TypeDescriptor>> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&oid)
            .cloned()
    }

    pub fn lookup_name(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|d| d.name == name)
            .cloned()
    }

    pub fn contains(&self, oid: Oid) -> bool {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&oid)
    }

    fn get(&self, oid: Oid) -> Result<Arc<TypeDescriptor>> {
        self.lookup(oid).ok_or(Error::UnsupportedType(oid))
    }

    /// Whether values of `oid` can be received in binary.
    pub fn supports_binary(&self, oid: Oid) -> bool {
        self.supports_binary_at(oid, 0)
    }

    fn supports_binary_at(&self, oid: Oid, depth: usize) -> bool {
        if depth > MAX_TYPE_DEPTH {
            return false;
        }
        let Some(desc) = self.lookup(oid) else {
            return false;
        };
        match (&desc.codec, desc.category) {
            (CodecRef::Plugin(codec), _) => codec.supports_binary(),
            (CodecRef::Builtin(b), _) => b.supports_binary(&self.settings),
            (CodecRef::Structural, TypeCategory::Array) => {
                self.supports_binary_at(desc.element_oid, depth + 1)
            }
            (CodecRef::Structural, TypeCategory::Composite) => desc
                .fields
                .iter()
                .all(|f| self.supports_binary_at(f.oid, depth + 1)),
            (CodecRef::Structural, TypeCategory::Range) => {
                self.supports_binary_at(desc.range_subtype, depth + 1)
            }
            (CodecRef::Structural, TypeCategory::Domain) => {
                self.supports_binary_at(desc.base_oid, depth + 1)
            }
            (CodecRef::Structural, TypeCategory::Enum) => true,
            (CodecRef::Structural, TypeCategory::Scalar) => false,
        }
    }

    /// The format to request for a result column of type `oid`.
    pub fn result_format(&self, oid: Oid) -> FormatCode {
        if self.supports_binary(oid) {
            FormatCode::Binary
        } else {
            FormatCode::Text
        }
    }

    /// Follow domain chains to the type that actually carries the codec.
    fn resolve(&self, oid: Oid) -> Result<Arc<TypeDescriptor>> {
        let mut desc = self.get(oid)?;
        for _ in 0..MAX_TYPE_DEPTH {
            if desc.category != TypeCategory::Domain || matches!(desc.codec, CodecRef::Plugin(_)) {
                return Ok(desc);
            }
            desc = self.get(desc.base_oid)?;
        }
        Err(Error::Decode(format!("domain chain too deep for type {}", oid)))
    }

    pub fn decode(&self, oid: Oid, format: FormatCode, bytes: &[u8]) -> Result<Value> {
        let desc = self.resolve(oid)?;
        match &desc.codec {
            CodecRef::Plugin(codec) => return codec.decode(self, desc.oid, format, bytes),
            CodecRef::Builtin(b) => return b.decode(format, bytes, &self.settings),
            CodecRef::Structural => {}
        }
        match (desc.category, format) {
            (TypeCategory::Enum, _) => Ok(Value::Enum(utf8(bytes)?.to_owned())),
            (TypeCategory::Array, FormatCode::Binary) => {
                Ok(Value::Array(Array::decode_binary(self, bytes)?))
            }
            (TypeCategory::Array, FormatCode::Text) => {
                let delimiter = self
                    .lookup(desc.element_oid)
                    .map_or(',', |elem| elem.delimiter);
                Ok(Value::Array(Array::decode_text(
                    self,
                    desc.element_oid,
                    delimiter,
                    utf8(bytes)?,
                )?))
            }
            (TypeCategory::Composite, FormatCode::Binary) => {
                Ok(Value::Composite(Composite::decode_binary(self, desc.oid, bytes)?))
            }
            (TypeCategory::Composite, FormatCode::Text) => {
                if desc.fields.is_empty() && desc.oid == oid::RECORD {
                    // Anonymous rows carry no field types in text form.
                    return Ok(Value::Text(utf8(bytes)?.to_owned()));
                }
                let field_oids: Vec<Oid> = desc.fields.iter().map(|f| f.oid).collect();
                Ok(Value::Composite(Composite::decode_text(
                    self,
                    desc.oid,
                    &field_oids,
                    utf8(bytes)?,
                )?))
            }
            (TypeCategory::Range, FormatCode::Binary) => Ok(Value::Range(Range::decode_binary(
                self,
                desc.oid,
                desc.range_subtype,
                bytes,
            )?)),
            (TypeCategory::Range, FormatCode::Text) => Ok(Value::Range(Range::decode_text(
                self,
                desc.oid,
                desc.range_subtype,
                utf8(bytes)?,
            )?)),
            (TypeCategory::Scalar | TypeCategory::Domain, _) => {
                Err(Error::UnsupportedType(desc.oid))
            }
        }
    }

    /// Append `value` encoded as `oid` in `format`, without a length prefix.
    pub fn encode(&self, value: &Value, oid: Oid, format: FormatCode, buf: &mut Vec<u8>) -> Result<()> {
        if let Some(desc) = self.lookup(oid)
            && let CodecRef::Plugin(codec) = &desc.codec
        {
            return codec.encode(self, value, oid, format, buf);
        }
        match format {
            FormatCode::Binary => {
                if !value.binary_compatible(oid) {
                    return Err(Error::type_mismatch(value.natural_oid(), oid));
                }
                value.write_binary(oid, buf)
            }
            FormatCode::Text => {
                buf.extend_from_slice(value.text_for(oid).as_bytes());
                Ok(())
            }
        }
    }

    /// Register descriptors built from catalog rows.
    ///
    /// Returns the referenced OIDs (elements, bases, subtypes, attributes)
    /// that are still unknown, so the caller can fetch another round.
    pub fn load_catalog_rows(&self, types: &[CatalogType], attrs: &[CatalogAttribute]) -> Vec<Oid> {
        let mut referenced = Vec::new();
        for row in types {
            let mut desc = match row.kind {
                'c' => {
                    let fields: Vec<Field> = attrs
                        .iter()
                        .filter(|a| a.relid == row.relid)
                        .map(|a| Field {
                            name: a.name.clone(),
                            oid: a.type_oid,
                        })
                        .collect();
                    referenced.extend(fields.iter().map(|f| f.oid));
                    TypeDescriptor::composite(row.oid, &row.name, fields)
                }
                'd' => {
                    referenced.push(row.base_oid);
                    TypeDescriptor::domain(row.oid, &row.name, row.base_oid)
                }
                'e' => TypeDescriptor::enumeration(row.oid, &row.name),
                'r' => {
                    referenced.push(row.range_subtype);
                    TypeDescriptor::range(row.oid, &row.name, row.range_subtype)
                }
                'b' if row.category == 'A' && row.element_oid != 0 => {
                    referenced.push(row.element_oid);
                    TypeDescriptor::array(row.oid, &row.name, row.element_oid)
                }
                _ if row.name == "hstore" => {
                    TypeDescriptor::scalar(row.oid, &row.name, Builtin::Hstore)
                }
                // Other base, pseudo and multirange types pass through as text.
                _ => TypeDescriptor::scalar(row.oid, &row.name, Builtin::Passthrough),
            };
            desc.delimiter = row.delimiter;
            self.register(desc);
        }
        referenced.retain(|oid| *oid != 0 && !self.contains(*oid));
        referenced.sort_unstable();
        referenced.dedup();
        referenced
    }
}

fn builtin_descriptors() -> Vec<TypeDescriptor> {
    use Builtin as B;
    let scalars: [(Oid, &str, Builtin); 50] = [
        (oid::BOOL, "bool", B::Bool),
        (oid::BYTEA, "bytea", B::Bytea),
        (oid::CHAR, "char", B::Char),
        (oid::NAME, "name", B::Text),
        (oid::INT8, "int8", B::Int8),
        (oid::INT2, "int2", B::Int2),
        (oid::INT2VECTOR, "int2vector", B::Int2Vector),
        (oid::INT4, "int4", B::Int4),
        (oid::REGPROC, "regproc", B::RegOid),
        (oid::TEXT, "text", B::Text),
        (oid::OID, "oid", B::Oid),
        (oid::TID, "tid", B::Tid),
        (oid::XID, "xid", B::Oid),
        (oid::CID, "cid", B::Oid),
        (oid::OIDVECTOR, "oidvector", B::OidVector),
        (oid::JSON, "json", B::Json),
        (oid::XML, "xml", B::Xml),
        (oid::POINT, "point", B::Point),
        (oid::LSEG, "lseg", B::LineSegment),
        (oid::PATH, "path", B::Path),
        (oid::BOX, "box", B::Box),
        (oid::POLYGON, "polygon", B::Polygon),
        (oid::LINE, "line", B::Line),
        (oid::CIDR, "cidr", B::Cidr),
        (oid::FLOAT4, "float4", B::Float4),
        (oid::FLOAT8, "float8", B::Float8),
        (oid::UNKNOWN, "unknown", B::Text),
        (oid::CIRCLE, "circle", B::Circle),
        (oid::MONEY, "money", B::Money),
        (oid::MACADDR, "macaddr", B::MacAddr),
        (oid::INET, "inet", B::Inet),
        (oid::BPCHAR, "bpchar", B::Text),
        (oid::VARCHAR, "varchar", B::Text),
        (oid::BIT, "bit", B::Bits),
        (oid::VARBIT, "varbit", B::Bits),
        (oid::DATE, "date", B::Date),
        (oid::TIME, "time", B::Time),
        (oid::TIMESTAMP, "timestamp", B::Timestamp),
        (oid::TIMESTAMPTZ, "timestamptz", B::TimestampTz),
        (oid::INTERVAL, "interval", B::Interval),
        (oid::TIMETZ, "timetz", B::TimeTz),
        (oid::NUMERIC, "numeric", B::Numeric),
        (oid::REGCLASS, "regclass", B::RegOid),
        (oid::REGTYPE, "regtype", B::RegOid),
        (oid::UUID, "uuid", B::Uuid),
        (oid::JSONB, "jsonb", B::Jsonb),
        // Types whose binary form is not decoded here.
        (194, "pg_node_tree", B::Passthrough),
        (1033, "aclitem", B::Passthrough),
        (3614, "tsvector", B::Passthrough),
        (3615, "tsquery", B::Passthrough),
    ];
    let arrays: [(Oid, &str, Oid); 41] = [
        (oid::BOOL_ARRAY, "_bool", oid::BOOL),
        (oid::BYTEA_ARRAY, "_bytea", oid::BYTEA),
        (oid::CHAR_ARRAY, "_char", oid::CHAR),
        (oid::NAME_ARRAY, "_name", oid::NAME),
        (oid::INT2_ARRAY, "_int2", oid::INT2),
        (oid::INT4_ARRAY, "_int4", oid::INT4),
        (oid::TEXT_ARRAY, "_text", oid::TEXT),
        (oid::TID_ARRAY, "_tid", oid::TID),
        (oid::BPCHAR_ARRAY, "_bpchar", oid::BPCHAR),
        (oid::VARCHAR_ARRAY, "_varchar", oid::VARCHAR),
        (oid::INT8_ARRAY, "_int8", oid::INT8),
        (oid::POINT_ARRAY, "_point", oid::POINT),
        (oid::LSEG_ARRAY, "_lseg", oid::LSEG),
        (oid::PATH_ARRAY, "_path", oid::PATH),
        (oid::BOX_ARRAY, "_box", oid::BOX),
        (oid::FLOAT4_ARRAY, "_float4", oid::FLOAT4),
        (oid::FLOAT8_ARRAY, "_float8", oid::FLOAT8),
        (oid::POLYGON_ARRAY, "_polygon", oid::POLYGON),
        (oid::OID_ARRAY, "_oid", oid::OID),
        (oid::MACADDR_ARRAY, "_macaddr", oid::MACADDR),
        (oid::INET_ARRAY, "_inet", oid::INET),
        (oid::CIDR_ARRAY, "_cidr", oid::CIDR),
        (oid::CIRCLE_ARRAY, "_circle", oid::CIRCLE),
        (oid::LINE_ARRAY, "_line", oid::LINE),
        (oid::MONEY_ARRAY, "_money", oid::MONEY),
        (oid::BIT_ARRAY, "_bit", oid::BIT),
        (oid::VARBIT_ARRAY, "_varbit", oid::VARBIT),
        (oid::INT2VECTOR_ARRAY, "_int2vector", oid::INT2VECTOR),
        (oid::OIDVECTOR_ARRAY, "_oidvector", oid::OIDVECTOR),
        (oid::TIMESTAMP_ARRAY, "_timestamp", oid::TIMESTAMP),
        (oid::DATE_ARRAY, "_date", oid::DATE),
        (oid::TIME_ARRAY, "_time", oid::TIME),
        (oid::TIMESTAMPTZ_ARRAY, "_timestamptz", oid::TIMESTAMPTZ),
        (oid::INTERVAL_ARRAY, "_interval", oid::INTERVAL),
        (oid::NUMERIC_ARRAY, "_numeric", oid::NUMERIC),
        (oid::TIMETZ_ARRAY, "_timetz", oid::TIMETZ),
        (oid::UUID_ARRAY, "_uuid", oid::UUID),
        (oid::JSON_ARRAY, "_json", oid::JSON),
        (oid::XML_ARRAY, "_xml", oid::XML),
        (oid::JSONB_ARRAY, "_jsonb", oid::JSONB),
        (oid::RECORD_ARRAY, "_record", oid::RECORD),
    ];
    let ranges: [(Oid, &str, Oid); 6] = [
        (oid::INT4RANGE, "int4range", oid::INT4),
        (oid::NUMRANGE, "numrange", oid::NUMERIC),
        (oid::TSRANGE, "tsrange", oid::TIMESTAMP),
        (oid::TSTZRANGE, "tstzrange", oid::TIMESTAMPTZ),
        (oid::DATERANGE, "daterange", oid::DATE),
        (oid::INT8RANGE, "int8range", oid::INT8),
    ];

    let mut out: Vec<TypeDescriptor> = scalars
        .iter()
        .map(|(oid, name, b)| TypeDescriptor::scalar(*oid, name, *b))
        .collect();
    out.extend(
        arrays
            .iter()
            .map(|(oid, name, elem)| TypeDescriptor::array(*oid, name, *elem)),
    );
    out.extend(
        ranges
            .iter()
            .map(|(oid, name, sub)| TypeDescriptor::range(*oid, name, *sub)),
    );
    out.push(TypeDescriptor::composite(oid::RECORD, "record", Vec::new()));
    out
}
