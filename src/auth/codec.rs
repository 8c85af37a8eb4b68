//! Text form of macaroons exchanged with the remote store.
//!
//! Serialized macaroons are URL-safe base64 of the binary form. The store
//! hands them out without trailing `=` padding, so decoding pads first.

use super::error::{AuthError, Result};
use super::macaroon::BinaryCredential;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;

/// Store-compatible text form of a credential (padded URL-safe base64).
pub fn serialize_macaroon<C: BinaryCredential>(credential: &C) -> Result<String> {
    let marshalled = credential
        .marshal_binary()
        .map_err(|e| AuthError::MalformedCredentialEncoding(e.to_string()))?;
    Ok(URL_SAFE.encode(marshalled))
}

/// Parse a credential from its store text form, padded or not.
pub fn deserialize_macaroon<C: BinaryCredential>(serialized: &str) -> Result<C> {
    let decoded = base64_decode_unpadded(serialized)
        .map_err(|e| AuthError::MalformedCredentialEncoding(e.to_string()))?;
    C::unmarshal_binary(&decoded).map_err(|e| AuthError::MalformedCredentialEncoding(e.to_string()))
}

/// Decode URL-safe base64 that may be missing its trailing pad characters.
fn base64_decode_unpadded(encoded: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let padded_len = encoded.len().div_ceil(4) * 4;
    let mut padded = String::with_capacity(padded_len);
    padded.push_str(encoded);
    padded.extend(std::iter::repeat_n('=', padded_len - encoded.len()));
    URL_SAFE.decode(padded)
}
