//! Macaroon credential and its binary encoding.
//!
//! Wire layout (version 2):
//!
//! ```text
//! 0x02
//! [location] identifier EOS              header section
//! ([location] identifier [vid] EOS)*     one section per caveat
//! EOS                                    end of caveats
//! signature
//! ```
//!
//! Every field is `type varint, length varint, data`; `EOS` is a single zero
//! byte. Field types: location = 1, identifier = 2, verification id = 4,
//! signature = 6.
//!
//! Version 1 credentials are still accepted on decode. They are a run of
//! packets, each `<4 hex digit total length>key value\n`, with keys
//! `location`, `identifier`, then `cid` / `vid` / `cl` per caveat, and
//! `signature` last. Encoding always produces version 2.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const VERSION: u8 = 2;

const FIELD_EOS: u64 = 0;
const FIELD_LOCATION: u64 = 1;
const FIELD_IDENTIFIER: u64 = 2;
const FIELD_VID: u64 = 4;
const FIELD_SIGNATURE: u64 = 6;

/// Signature length (HMAC-SHA256 output).
pub const SIGNATURE_LEN: usize = 32;

/// Key used to derive the signing key from a caller-supplied root key.
const KEY_GENERATOR: &[u8] = b"macaroons-key-generator";

/// An opaque credential with a canonical binary form.
pub trait BinaryCredential: Sized {
    type Error: std::fmt::Display;

    fn marshal_binary(&self) -> Result<Vec<u8>, Self::Error>;

    fn unmarshal_binary(data: &[u8]) -> Result<Self, Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MacaroonError {
    #[error("macaroon data truncated")]
    Truncated,
    #[error("unsupported macaroon version {0}")]
    UnsupportedVersion(u8),
    #[error("unexpected field type {0}")]
    UnexpectedField(u64),
    #[error("field length varint overflows")]
    VarintOverflow,
    #[error("missing identifier")]
    MissingIdentifier,
    #[error("location is not valid UTF-8")]
    InvalidLocation,
    #[error("signature has wrong length {0}")]
    BadSignatureLength(usize),
    #[error("{0} trailing bytes after signature")]
    TrailingData(usize),
    #[error("malformed v1 packet")]
    InvalidPacket,
    #[error("unexpected v1 packet {0:?}")]
    UnexpectedPacket(String),
}

/// A caveat attached to a macaroon. Third-party caveats carry a
/// verification id; first-party caveats leave it empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caveat {
    pub id: Vec<u8>,
    pub location: String,
    pub verification_id: Vec<u8>,
}

impl Caveat {
    pub fn is_third_party(&self) -> bool {
        !self.verification_id.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macaroon {
    location: String,
    id: Vec<u8>,
    caveats: Vec<Caveat>,
    signature: [u8; SIGNATURE_LEN],
}

impl Macaroon {
    /// Mint a macaroon signed with `root_key`.
    pub fn new(root_key: &[u8], id: &[u8], location: &str) -> Self {
        let key = keyed_hash(KEY_GENERATOR, root_key);
        Self {
            location: location.to_string(),
            id: id.to_vec(),
            caveats: Vec::new(),
            signature: keyed_hash(&key, id),
        }
    }

    /// Append a first-party caveat and extend the signature chain.
    pub fn add_first_party_caveat(&mut self, condition: &[u8]) {
        self.signature = keyed_hash(&self.signature, condition);
        self.caveats.push(Caveat {
            id: condition.to_vec(),
            location: String::new(),
            verification_id: Vec::new(),
        });
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn caveats(&self) -> &[Caveat] {
        &self.caveats
    }

    pub fn signature(&self) -> &[u8; SIGNATURE_LEN] {
        &self.signature
    }

    pub fn signature_hex(&self) -> String {
        hex::encode(self.signature)
    }
}

impl BinaryCredential for Macaroon {
    type Error = MacaroonError;

    fn marshal_binary(&self) -> Result<Vec<u8>, MacaroonError> {
        if self.id.is_empty() || self.caveats.iter().any(|c| c.id.is_empty()) {
            return Err(MacaroonError::MissingIdentifier);
        }

        let mut out = Vec::with_capacity(64 + self.id.len());
        out.push(VERSION);

        if !self.location.is_empty() {
            put_field(&mut out, FIELD_LOCATION, self.location.as_bytes());
        }
        put_field(&mut out, FIELD_IDENTIFIER, &self.id);
        out.push(0);

        for caveat in &self.caveats {
            if !caveat.location.is_empty() {
                put_field(&mut out, FIELD_LOCATION, caveat.location.as_bytes());
            }
            put_field(&mut out, FIELD_IDENTIFIER, &caveat.id);
            if !caveat.verification_id.is_empty() {
                put_field(&mut out, FIELD_VID, &caveat.verification_id);
            }
            out.push(0);
        }
        out.push(0);

        put_field(&mut out, FIELD_SIGNATURE, &self.signature);
        Ok(out)
    }

    fn unmarshal_binary(data: &[u8]) -> Result<Self, MacaroonError> {
        let mut dec = Decoder { buf: data, pos: 0 };

        // v1 starts with the hex length of its first packet
        if dec.peek()?.is_ascii_hexdigit() {
            return unmarshal_v1(data);
        }

        let version = dec.byte()?;
        if version != VERSION {
            return Err(MacaroonError::UnsupportedVersion(version));
        }

        let header = dec.section(&[FIELD_LOCATION, FIELD_IDENTIFIER])?;
        if header.id.is_empty() {
            return Err(MacaroonError::MissingIdentifier);
        }

        let mut caveats = Vec::new();
        while dec.peek()? != 0 {
            let section = dec.section(&[FIELD_LOCATION, FIELD_IDENTIFIER, FIELD_VID])?;
            if section.id.is_empty() {
                return Err(MacaroonError::MissingIdentifier);
            }
            caveats.push(section);
        }
        dec.byte()?;

        let (kind, sig) = dec.field()?;
        if kind != FIELD_SIGNATURE {
            return Err(MacaroonError::UnexpectedField(kind));
        }
        let signature: [u8; SIGNATURE_LEN] = sig
            .try_into()
            .map_err(|_| MacaroonError::BadSignatureLength(sig.len()))?;

        let rest = data.len() - dec.pos;
        if rest != 0 {
            return Err(MacaroonError::TrailingData(rest));
        }

        Ok(Self {
            location: header.location,
            id: header.id,
            caveats,
            signature,
        })
    }
}

/// Length of the hex size prefix on every v1 packet.
const V1_HEADER_LEN: usize = 4;

fn unmarshal_v1(data: &[u8]) -> Result<Macaroon, MacaroonError> {
    let mut location = String::new();
    let mut id: Option<Vec<u8>> = None;
    let mut caveats: Vec<Caveat> = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        let (key, value, size) = v1_packet(&data[pos..])?;
        pos += size;

        match key {
            b"location" if id.is_none() => location = utf8_location(value)?,
            b"identifier" if id.is_none() => id = Some(value.to_vec()),
            b"cid" if id.is_some() => caveats.push(Caveat {
                id: value.to_vec(),
                location: String::new(),
                verification_id: Vec::new(),
            }),
            b"vid" if !caveats.is_empty() => {
                if let Some(caveat) = caveats.last_mut() {
                    caveat.verification_id = value.to_vec();
                }
            }
            b"cl" if !caveats.is_empty() => {
                if let Some(caveat) = caveats.last_mut() {
                    caveat.location = utf8_location(value)?;
                }
            }
            b"signature" => {
                let id = id.ok_or(MacaroonError::MissingIdentifier)?;
                if id.is_empty() {
                    return Err(MacaroonError::MissingIdentifier);
                }
                let signature: [u8; SIGNATURE_LEN] = value
                    .try_into()
                    .map_err(|_| MacaroonError::BadSignatureLength(value.len()))?;
                let rest = data.len() - pos;
                if rest != 0 {
                    return Err(MacaroonError::TrailingData(rest));
                }
                return Ok(Macaroon {
                    location,
                    id,
                    caveats,
                    signature,
                });
            }
            _ => {
                return Err(MacaroonError::UnexpectedPacket(
                    String::from_utf8_lossy(key).into_owned(),
                ))
            }
        }
    }

    // Ran out of packets before the signature
    Err(MacaroonError::Truncated)
}

/// Split one v1 packet off `buf`: (key, value, packet length).
fn v1_packet(buf: &[u8]) -> Result<(&[u8], &[u8], usize), MacaroonError> {
    let header = buf.get(..V1_HEADER_LEN).ok_or(MacaroonError::Truncated)?;
    let size = std::str::from_utf8(header)
        .ok()
        .and_then(|hex| usize::from_str_radix(hex, 16).ok())
        .ok_or(MacaroonError::InvalidPacket)?;
    if size <= V1_HEADER_LEN {
        return Err(MacaroonError::InvalidPacket);
    }

    let body = buf
        .get(V1_HEADER_LEN..size)
        .ok_or(MacaroonError::Truncated)?
        .strip_suffix(b"\n")
        .ok_or(MacaroonError::InvalidPacket)?;
    let split = body
        .iter()
        .position(|&b| b == b' ')
        .ok_or(MacaroonError::InvalidPacket)?;
    Ok((&body[..split], &body[split + 1..], size))
}

fn utf8_location(data: &[u8]) -> Result<String, MacaroonError> {
    std::str::from_utf8(data)
        .map(str::to_string)
        .map_err(|_| MacaroonError::InvalidLocation)
}

fn keyed_hash(key: &[u8], data: &[u8]) -> [u8; SIGNATURE_LEN] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can accept any key length");
    mac.update(data);
    let mut out = [0u8; SIGNATURE_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn put_field(out: &mut Vec<u8>, kind: u64, data: &[u8]) {
    put_varint(out, kind);
    put_varint(out, data.len() as u64);
    out.extend_from_slice(data);
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Result<u8, MacaroonError> {
        self.buf.get(self.pos).copied().ok_or(MacaroonError::Truncated)
    }

    fn byte(&mut self) -> Result<u8, MacaroonError> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn varint(&mut self) -> Result<u64, MacaroonError> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let b = self.byte()?;
            value |= u64::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(MacaroonError::VarintOverflow)
    }

    fn field(&mut self) -> Result<(u64, &'a [u8]), MacaroonError> {
        let kind = self.varint()?;
        if kind == FIELD_EOS {
            let empty: &'a [u8] = &[];
            return Ok((kind, empty));
        }
        let len = usize::try_from(self.varint()?).map_err(|_| MacaroonError::Truncated)?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(MacaroonError::Truncated)?;
        let data = &self.buf[self.pos..end];
        self.pos = end;
        Ok((kind, data))
    }

    /// Read fields up to EOS. Field types must appear in `allowed` order.
    fn section(&mut self, allowed: &[u64]) -> Result<Caveat, MacaroonError> {
        let mut section = Caveat {
            id: Vec::new(),
            location: String::new(),
            verification_id: Vec::new(),
        };
        let mut next = 0;
        loop {
            let (kind, data) = self.field()?;
            if kind == FIELD_EOS {
                return Ok(section);
            }
            let Some(offset) = allowed[next..].iter().position(|&k| k == kind) else {
                return Err(MacaroonError::UnexpectedField(kind));
            };
            next += offset + 1;
            match kind {
                FIELD_LOCATION => section.location = utf8_location(data)?,
                FIELD_IDENTIFIER => section.id = data.to_vec(),
                _ => section.verification_id = data.to_vec(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Macaroon {
        let mut m = Macaroon::new(b"root-key", b"some-id", "remote location");
        m.add_first_party_caveat(b"account = 3735928559");
        m.add_first_party_caveat(b"time < 2030-01-01T00:00:00Z");
        m
    }

    /// One v1 packet: 4 hex digits of total length, `key value`, newline.
    fn v1_packet_bytes(key: &str, value: &[u8]) -> Vec<u8> {
        let size = V1_HEADER_LEN + key.len() + 1 + value.len() + 1;
        let mut out = format!("{size:04x}{key} ").into_bytes();
        out.extend_from_slice(value);
        out.push(b'\n');
        out
    }

    #[test]
    fn decodes_v1_packets() {
        let signature = [7u8; SIGNATURE_LEN];
        let mut bytes = Vec::new();
        bytes.extend(v1_packet_bytes("location", b"https://store.example.com"));
        bytes.extend(v1_packet_bytes("identifier", b"store-issued id"));
        bytes.extend(v1_packet_bytes("cid", b"snap-id = abc"));
        bytes.extend(v1_packet_bytes("cid", b"third-party-cid"));
        bytes.extend(v1_packet_bytes("vid", b"opaque vid"));
        bytes.extend(v1_packet_bytes("cl", b"https://login.example.com"));
        bytes.extend(v1_packet_bytes("signature", &signature));

        let m = Macaroon::unmarshal_binary(&bytes).unwrap();
        assert_eq!(m.location(), "https://store.example.com");
        assert_eq!(m.id(), b"store-issued id");
        assert_eq!(m.signature(), &signature);
        assert_eq!(m.caveats().len(), 2);
        assert!(!m.caveats()[0].is_third_party());
        assert_eq!(m.caveats()[1].verification_id, b"opaque vid");
        assert_eq!(m.caveats()[1].location, "https://login.example.com");

        // Re-encodes as v2 without losing anything
        let v2 = m.marshal_binary().unwrap();
        assert_eq!(v2[0], VERSION);
        assert_eq!(Macaroon::unmarshal_binary(&v2).unwrap(), m);
    }

    #[test]
    fn v1_signature_may_contain_newlines_and_spaces() {
        let mut signature = [b'\n'; SIGNATURE_LEN];
        signature[0] = b' ';
        let mut bytes = v1_packet_bytes("identifier", b"id");
        bytes.extend(v1_packet_bytes("signature", &signature));

        assert_eq!(
            Macaroon::unmarshal_binary(&bytes).unwrap().signature(),
            &signature
        );
    }

    #[test]
    fn rejects_malformed_v1() {
        let ident = v1_packet_bytes("identifier", b"id");

        // No signature packet
        assert_eq!(
            Macaroon::unmarshal_binary(&ident).unwrap_err(),
            MacaroonError::Truncated
        );

        // Length header that is not hex
        let mut bad_len = ident.clone();
        bad_len[3] = b'z';
        assert_eq!(
            Macaroon::unmarshal_binary(&bad_len).unwrap_err(),
            MacaroonError::InvalidPacket
        );

        // Missing trailing newline
        let mut no_newline = ident.clone();
        no_newline.pop();
        no_newline.push(b'x');
        assert_eq!(
            Macaroon::unmarshal_binary(&no_newline).unwrap_err(),
            MacaroonError::InvalidPacket
        );

        // Caveat fields before the identifier
        let early = v1_packet_bytes("cid", b"x");
        assert_eq!(
            Macaroon::unmarshal_binary(&early).unwrap_err(),
            MacaroonError::UnexpectedPacket("cid".into())
        );

        // Anything after the signature
        let mut trailing = ident.clone();
        trailing.extend(v1_packet_bytes("signature", &[0u8; SIGNATURE_LEN]));
        trailing.extend(v1_packet_bytes("cid", b"late"));
        let late_len = v1_packet_bytes("cid", b"late").len();
        assert_eq!(
            Macaroon::unmarshal_binary(&trailing).unwrap_err(),
            MacaroonError::TrailingData(late_len)
        );

        // Short signature
        let mut short = ident;
        short.extend(v1_packet_bytes("signature", &[0u8; 8]));
        assert_eq!(
            Macaroon::unmarshal_binary(&short).unwrap_err(),
            MacaroonError::BadSignatureLength(8)
        );
    }

    #[test]
    fn binary_roundtrip_preserves_everything() {
        let m = sample();
        let decoded = Macaroon::unmarshal_binary(&m.marshal_binary().unwrap()).unwrap();
        assert_eq!(decoded, m);
        assert_eq!(decoded.caveats().len(), 2);
        assert_eq!(decoded.location(), "remote location");
    }

    #[test]
    fn caveats_extend_signature_chain() {
        let plain = Macaroon::new(b"root-key", b"some-id", "");
        let caveated = sample();
        assert_ne!(plain.signature(), caveated.signature());

        // Same inputs, same signature
        assert_eq!(sample().signature_hex(), caveated.signature_hex());
        assert_eq!(caveated.signature_hex().len(), SIGNATURE_LEN * 2);
    }

    #[test]
    fn different_root_keys_sign_differently() {
        let a = Macaroon::new(b"key-a", b"id", "");
        let b = Macaroon::new(b"key-b", b"id", "");
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn encoding_layout() {
        let m = Macaroon::new(b"k", b"id", "");
        let bytes = m.marshal_binary().unwrap();

        assert_eq!(&bytes[..6], &[VERSION, 2, 2, b'i', b'd', 0]);
        // No caveats: end-of-caveats marker then the signature field
        assert_eq!(&bytes[6..9], &[0, 6, 32]);
        assert_eq!(&bytes[9..], m.signature());
    }

    #[test]
    fn decodes_third_party_caveat() {
        let m = Macaroon::new(b"k", b"id", "loc");
        let mut bytes = vec![VERSION];
        put_field(&mut bytes, FIELD_LOCATION, b"loc");
        put_field(&mut bytes, FIELD_IDENTIFIER, b"id");
        bytes.push(0);
        put_field(&mut bytes, FIELD_LOCATION, b"https://login.example.com");
        put_field(&mut bytes, FIELD_IDENTIFIER, b"third-party-cid");
        put_field(&mut bytes, FIELD_VID, b"opaque-vid");
        bytes.push(0);
        bytes.push(0);
        put_field(&mut bytes, FIELD_SIGNATURE, m.signature());

        let decoded = Macaroon::unmarshal_binary(&bytes).unwrap();
        let caveat = &decoded.caveats()[0];
        assert!(caveat.is_third_party());
        assert_eq!(caveat.location, "https://login.example.com");
        assert_eq!(caveat.verification_id, b"opaque-vid");
        assert_eq!(decoded.marshal_binary().unwrap(), bytes);
    }

    #[test]
    fn large_fields_use_multibyte_lengths() {
        let id = vec![b'x'; 300];
        let m = Macaroon::new(b"k", &id, "");
        let bytes = m.marshal_binary().unwrap();
        assert_eq!(&bytes[1..4], &[2, 0xac, 0x02]);
        assert_eq!(Macaroon::unmarshal_binary(&bytes).unwrap().id(), &id[..]);
    }

    #[test]
    fn rejects_malformed_input() {
        let good = sample().marshal_binary().unwrap();

        assert_eq!(
            Macaroon::unmarshal_binary(&[]).unwrap_err(),
            MacaroonError::Truncated
        );
        assert_eq!(
            Macaroon::unmarshal_binary(&[1, 2, 3]).unwrap_err(),
            MacaroonError::UnsupportedVersion(1)
        );
        assert_eq!(
            Macaroon::unmarshal_binary(&good[..good.len() - 1]).unwrap_err(),
            MacaroonError::Truncated
        );

        let mut trailing = good.clone();
        trailing.push(0xff);
        assert_eq!(
            Macaroon::unmarshal_binary(&trailing).unwrap_err(),
            MacaroonError::TrailingData(1)
        );
    }

    #[test]
    fn rejects_out_of_order_fields() {
        let mut bytes = vec![VERSION];
        put_field(&mut bytes, FIELD_IDENTIFIER, b"id");
        put_field(&mut bytes, FIELD_LOCATION, b"loc");
        bytes.push(0);
        assert_eq!(
            Macaroon::unmarshal_binary(&bytes).unwrap_err(),
            MacaroonError::UnexpectedField(FIELD_LOCATION)
        );
    }

    #[test]
    fn rejects_missing_identifier() {
        let mut bytes = vec![VERSION];
        put_field(&mut bytes, FIELD_LOCATION, b"loc");
        bytes.push(0);
        assert_eq!(
            Macaroon::unmarshal_binary(&bytes).unwrap_err(),
            MacaroonError::MissingIdentifier
        );

        let empty = Macaroon::new(b"k", b"", "");
        assert_eq!(
            empty.marshal_binary().unwrap_err(),
            MacaroonError::MissingIdentifier
        );
    }

    #[test]
    fn rejects_short_signature() {
        let mut bytes = vec![VERSION];
        put_field(&mut bytes, FIELD_IDENTIFIER, b"id");
        bytes.push(0);
        bytes.push(0);
        put_field(&mut bytes, FIELD_SIGNATURE, &[0u8; 16]);
        assert_eq!(
            Macaroon::unmarshal_binary(&bytes).unwrap_err(),
            MacaroonError::BadSignatureLength(16)
        );
    }
}
