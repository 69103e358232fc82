//! SSRF guard for outbound HTTP.
//!
//! Only destinations supplied by users or administrators (webhooks) go through
//! here. The block list is frozen at startup and shared read-only.

pub mod blocklist;
pub mod transport;

pub use blocklist::{BlockList, BlockListBuilder, ConnectDecision, RejectReason};
pub use transport::{safe_client, EgressError, GuardedResolver, SafeTransport, Transport};
