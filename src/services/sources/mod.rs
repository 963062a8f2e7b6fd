// Upstream source clients.
//
// Each source speaks its own protocol (assessor JSON API, MLS HTML); the
// collectors compose them with the matching adapter.

mod maricopa;

pub use maricopa::{MARICOPA_SOURCE, MaricopaClient};
