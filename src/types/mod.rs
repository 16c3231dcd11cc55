//! Dynamic type registry.
//!
//! Column values are decoded into [`Value`] through a [`TypeRegistry`] that
//! maps type OIDs to codecs. Built-in types are preloaded; user-defined
//! enums, composites, domains, arrays and ranges are discovered from the
//! server catalog on first use.

pub mod codec;
pub mod registry;
pub mod shared;
pub mod value;

pub use codec::Codec;
pub use codec::array::{Array, Dim};
pub use codec::bits::BitString;
pub use codec::composite::Composite;
pub use codec::datetime::{Date, Time, TimeTz, Timestamp};
pub use codec::geometric::{Circle, Line, LineSegment, Path, PgBox, Point, Polygon};
pub use codec::hstore::Hstore;
pub use codec::interval::Interval;
pub use codec::money::Money;
pub use codec::network::{Inet, MacAddr};
pub use codec::numeric::Numeric;
pub use codec::range::{Range, RangeBound};
pub use codec::scalar::{Builtin, Tid};
pub use registry::{
    CatalogAttribute, CatalogType, CodecRef, Field, FormatSettings, TypeCategory, TypeDescriptor,
    TypeRegistry,
};
pub use shared::{RegistryKey, SharedRegistryCache};
pub use value::{FromValue, Value};
