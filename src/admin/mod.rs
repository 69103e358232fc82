//! Administrative user management.
//!
//! Every create/update/delete runs in one storage transaction together with
//! exactly one audit log entry. Either both land or neither does.

pub mod executor;
pub mod mutation;
pub mod params;
pub mod password;

pub use executor::{settle, AdminExecutor};
pub use mutation::{MutationContext, MutationPlan, UserMutation};
pub use params::{parse_ban_duration, AdminUserParams};
pub use password::{generate_password, Argon2Hasher, PasswordHasher};
