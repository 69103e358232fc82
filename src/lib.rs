//! Trust-boundary core of an identity service.
//!
//! * [`auth`] turns verified claims into an acting user and an admin decision.
//! * [`admin`] applies user mutations atomically with exactly one audit entry.
//! * [`redirect`] keeps post-auth redirects on the site or its allow-list.
//! * [`egress`] stops outbound requests from reaching private networks.

pub mod admin;
pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod egress;
pub mod error;
pub mod models;
pub mod redirect;
pub mod storage;
pub mod webhook;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
