//! Persisted entities: users, audit entries and MFA records.

pub mod audit;
pub mod mfa;
pub mod user;

pub use audit::{AuditAction, AuditLogEntry};
pub use mfa::{Challenge, Factor, FactorStatus, FactorType, RecoveryCode, RecoveryCodeUsed};
pub use user::{merge_metadata, Metadata, User, SYSTEM_USER_ID, SYSTEM_USER_UUID};
