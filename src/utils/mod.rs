pub mod canonical;
pub mod error;
pub mod sanitize;
pub mod scheduled_executor;
pub mod text;

pub use canonical::{canonical_json, hash_raw_payload, sha256_hex};
pub use error::{ApiError, ApiResult, ErrorKind, IngestError};
pub use sanitize::{is_sensitive_key, redact_json, redact_text};
pub use scheduled_executor::{ScheduledExecutor, ScheduledTask, ShutdownHandle};
pub use text::{
    clean_optional_string, is_valid_zipcode, make_property_id, normalize_street,
    parse_f64_flexible, parse_i64_flexible, parse_tristate,
};
