use crate::state::StateError;

/// Errors returned by authentication record and credential operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Reading or writing the auth state failed.
    #[error("auth state unavailable: {0}")]
    StoreUnavailable(#[from] StateError),
    /// No record exists for the requested id or username.
    #[error("invalid user")]
    NoSuchUser,
    /// `last-id` is at its maximum; no fresh id can be assigned.
    #[error("user ids exhausted")]
    IdsExhausted,
    /// The presented macaroon and discharges match no record.
    #[error("invalid authentication")]
    InvalidCredential,
    /// A serialized credential could not be encoded or decoded.
    #[error("malformed credential encoding: {0}")]
    MalformedCredentialEncoding(String),
    /// The rendered authorization value is not a legal header value.
    #[error("invalid authorization header: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

pub type Result<T, E = AuthError> = std::result::Result<T, E>;
