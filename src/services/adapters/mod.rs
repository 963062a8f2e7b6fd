// Raw-payload adapters.
// Purpose: map heterogeneous source payloads into the canonical Property
// schema with a quality score. One adapter per source convention; shared
// coercion helpers live here.

mod maricopa;
mod phoenix_mls;

pub use maricopa::MaricopaAdapter;
pub use phoenix_mls::PhoenixMlsAdapter;

use serde_json::{Map, Value};

use crate::models::Property;
use crate::utils::IngestError;

/// Unified adapter interface over the source conventions.
pub trait PropertyAdapter: Send + Sync {
    /// Source tag recorded in provenance metadata
    fn source_name(&self) -> &'static str;

    /// Transform one raw record into a canonical Property.
    ///
    /// Missing optional fields never fail; missing required fields
    /// (house number, street name, zipcode) fail with a validation error.
    fn adapt(&self, raw: &Value) -> Result<Property, IngestError>;
}

/// First candidate key holding a usable value. Empty strings, zeros, and
/// nulls are skipped, matching the source convention where zero means
/// "not recorded".
pub(crate) fn first_usable<'a>(map: &'a Map<String, Value>, candidates: &[&str]) -> Option<&'a Value> {
    for key in candidates {
        match map.get(*key) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) if s.trim().is_empty() => continue,
            Some(Value::Number(n)) if n.as_f64() == Some(0.0) => continue,
            Some(value) => return Some(value),
        }
    }
    None
}

pub(crate) fn string_field(map: &Map<String, Value>, candidates: &[&str]) -> Option<String> {
    first_usable(map, candidates).and_then(|v| match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

pub(crate) fn object<'a>(raw: &'a Value, key: &str) -> Option<&'a Map<String, Value>> {
    raw.get(key).and_then(Value::as_object)
}
