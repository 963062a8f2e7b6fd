//! Text coercion helpers for heterogeneous source payloads.
//!
//! Upstream sources disagree on how they spell numbers, booleans, and
//! addresses; everything funnels through here so the adapters stay small.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static ZIPCODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{5}(-\d{4})?$").unwrap());
static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// 5-digit or ZIP+4 form.
pub fn is_valid_zipcode(zipcode: &str) -> bool {
    ZIPCODE.is_match(zipcode)
}

/// Trim and drop empty strings.
pub fn clean_optional_string(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Parse an integer that may carry thousands separators or a trailing
/// decimal part ("1,850", "1850.0").
pub fn parse_i64_flexible(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let cleaned: String = s.trim().replace(',', "");
            if cleaned.is_empty() {
                return None;
            }
            cleaned
                .parse::<i64>()
                .ok()
                .or_else(|| cleaned.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

/// Parse a float with the same tolerance.
pub fn parse_f64_flexible(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s.trim().replace([',', '$'], "");
            if cleaned.is_empty() { None } else { cleaned.parse::<f64>().ok() }
        }
        _ => None,
    }
}

/// Tri-state boolean recognition: {yes,true,1,y,on} / {no,false,0,n,off},
/// case-insensitive. Anything else is unknown.
pub fn parse_tristate(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "1" | "y" | "on" => Some(true),
            "no" | "false" | "0" | "n" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Normalize a street line for use inside a property id:
/// lowercase, runs of non-alphanumerics collapsed to single underscores.
pub fn normalize_street(street: &str) -> String {
    let lower = street.trim().to_ascii_lowercase();
    NON_ALNUM.replace_all(&lower, "_").trim_matches('_').to_string()
}

/// Canonical property id: `<source>_<normalized-street>_<zipcode>`.
pub fn make_property_id(source: &str, street: &str, zipcode: &str) -> String {
    format!("{}_{}_{}", source, normalize_street(street), zipcode)
}
