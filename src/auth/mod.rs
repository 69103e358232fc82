//! Claims-based identity and authorization.
//!
//! Claims arrive already verified; this module only interprets them.

pub mod authorize;
pub mod claims;

pub use authorize::{is_admin, request_audience, require_admin, resolve_actor, UserLookup};
pub use claims::Claims;
