//! STUN binding request/response codec.
//!
//! Implements just enough of the binding exchange to discover this host's
//! reflexive transport address: a fixed 20-byte request with no attributes,
//! and response decoding that scans type/length-prefixed attributes for a
//! MAPPED-ADDRESS or XOR-MAPPED-ADDRESS.
//!
//! The codec has no notion of a socket; it operates purely on byte buffers.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::FrameError;

/// STUN magic cookie, network byte order `21 12 A4 42`.
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

/// Transaction id length in bytes.
pub const TRANSACTION_ID_LEN: usize = 12;

const HEADER_LEN: usize = 20;
const BINDING_REQUEST: u16 = 0x0100;
const BINDING_RESPONSE: u16 = 0x0101;

const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

/// Binding request: fixed header, zero attributes.
///
/// The transaction id correlates the response exactly like an IQ `id`
/// correlates stanzas, but at the binary-frame level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingRequest {
    transaction_id: [u8; TRANSACTION_ID_LEN],
}

impl BindingRequest {
    /// Create a request with a random transaction id.
    pub fn new() -> Self {
        Self {
            transaction_id: rand::random(),
        }
    }

    /// Create a request with a caller-supplied transaction id.
    pub fn with_transaction_id(transaction_id: [u8; TRANSACTION_ID_LEN]) -> Self {
        Self { transaction_id }
    }

    /// The transaction id the matching response must echo.
    pub fn transaction_id(&self) -> &[u8; TRANSACTION_ID_LEN] {
        &self.transaction_id
    }

    /// Encode the 20-byte request frame.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..2].copy_from_slice(&BINDING_REQUEST.to_be_bytes());
        // bytes 2..4 stay zero: no attributes
        buf[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        buf[8..20].copy_from_slice(&self.transaction_id);
        buf
    }
}

impl Default for BindingRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoded binding response carrying the reflexive transport address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingResponse {
    /// Echoed transaction id.
    pub transaction_id: [u8; TRANSACTION_ID_LEN],
    /// Address the server observed this request arriving from.
    pub mapped_address: SocketAddr,
}

impl BindingResponse {
    /// Decode a binding response frame.
    ///
    /// Validates header length, message type and magic cookie, then scans
    /// the declared attribute bytes. Unknown attribute types are skipped
    /// using their declared length (values are padded to a 4-byte
    /// boundary). Absence of a mapped-address attribute, or any field
    /// running past the declared message length, is a [`FrameError`].
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < HEADER_LEN {
            return Err(FrameError::TooShort {
                expected: HEADER_LEN,
                actual: buf.len(),
            });
        }

        let message_type = u16::from_be_bytes([buf[0], buf[1]]);
        if message_type != BINDING_RESPONSE {
            return Err(FrameError::UnexpectedType(message_type));
        }

        let cookie = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if cookie != MAGIC_COOKIE {
            return Err(FrameError::InvalidMagic);
        }

        let mut transaction_id = [0u8; TRANSACTION_ID_LEN];
        transaction_id.copy_from_slice(&buf[8..20]);

        let declared_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let end = HEADER_LEN + declared_len;
        if end > buf.len() {
            return Err(FrameError::Truncated);
        }

        let mut cursor = HEADER_LEN;
        while cursor < end {
            if cursor + 4 > end {
                return Err(FrameError::Truncated);
            }
            let attr_type = u16::from_be_bytes([buf[cursor], buf[cursor + 1]]);
            let attr_len = u16::from_be_bytes([buf[cursor + 2], buf[cursor + 3]]) as usize;
            let value_start = cursor + 4;
            let value_end = value_start + attr_len;
            if value_end > end {
                return Err(FrameError::Truncated);
            }

            match attr_type {
                ATTR_MAPPED_ADDRESS | ATTR_XOR_MAPPED_ADDRESS => {
                    let mapped_address = decode_address(
                        &buf[value_start..value_end],
                        attr_type == ATTR_XOR_MAPPED_ADDRESS,
                        &transaction_id,
                    )?;
                    return Ok(Self {
                        transaction_id,
                        mapped_address,
                    });
                }
                _ => {}
            }

            cursor = value_start + padded(attr_len);
        }

        Err(FrameError::MissingMappedAddress)
    }
}

/// Round an attribute value length up to its padded on-wire size.
fn padded(len: usize) -> usize {
    (len + 3) & !3
}

fn decode_address(
    value: &[u8],
    xored: bool,
    transaction_id: &[u8; TRANSACTION_ID_LEN],
) -> Result<SocketAddr, FrameError> {
    if value.len() < 4 {
        return Err(FrameError::TooShort {
            expected: 4,
            actual: value.len(),
        });
    }

    let family = value[1];
    let mut port = u16::from_be_bytes([value[2], value[3]]);
    if xored {
        port ^= (MAGIC_COOKIE >> 16) as u16;
    }

    let cookie = MAGIC_COOKIE.to_be_bytes();
    match family {
        FAMILY_IPV4 => {
            if value.len() < 8 {
                return Err(FrameError::Truncated);
            }
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&value[4..8]);
            if xored {
                for (octet, key) in octets.iter_mut().zip(cookie) {
                    *octet ^= key;
                }
            }
            Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        FAMILY_IPV6 => {
            if value.len() < 20 {
                return Err(FrameError::Truncated);
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&value[4..20]);
            if xored {
                // IPv6 XORs against magic-cookie followed by transaction id
                let key = cookie.iter().chain(transaction_id.iter());
                for (octet, key) in octets.iter_mut().zip(key) {
                    *octet ^= key;
                }
            }
            Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        other => Err(FrameError::UnknownAddressFamily(other)),
    }
}
