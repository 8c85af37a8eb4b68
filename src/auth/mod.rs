//! Macaroon-based user authentication.
//!
//! Provides:
//! - Authentication records (id, username, macaroon, sorted discharges) kept
//!   as one document in a [`StateStore`](crate::state::StateStore)
//! - Credential matching: macaroon plus discharge set, order-independent
//! - Store-compatible macaroon text encoding (URL-safe base64, padding optional)
//! - `Authorization` header rendering for outbound requests
//!
//! ## Design Decisions
//! - A username maps to at most one record; creating a user for a known
//!   username replaces the old record under a fresh id.
//! - Removal is by username and keeps the remaining records in order.
//! - A failed credential check and an unreadable state both surface as
//!   [`AuthError::InvalidCredential`].

pub mod authenticator;
pub mod codec;
pub mod error;
pub mod macaroon;
pub mod store;

pub use authenticator::MacaroonAuthenticator;
pub use codec::{deserialize_macaroon, serialize_macaroon};
pub use error::AuthError;
pub use macaroon::{BinaryCredential, Caveat, Macaroon, MacaroonError};
pub use store::{AuthState, AuthStore, UserState, DEFAULT_STATE_KEY};
