//! Per-user macaroon authentication records for a control-plane process.
//!
//! Records are persisted as a single JSON document in a key/value
//! [`state`] store. [`auth`] issues, looks up and removes records, matches
//! inbound macaroon credentials against them, and renders the
//! `Authorization` header used to present a stored credential upstream.

pub mod auth;
pub mod config;
pub mod state;

pub use auth::{AuthError, AuthStore, MacaroonAuthenticator, UserState};
pub use config::AuthConfig;
