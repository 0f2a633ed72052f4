//! Error types for the bytestream codecs.

use thiserror::Error;

/// Malformed binary data in a SOCKS5 or STUN frame.
///
/// Always fatal to the negotiation that produced it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer is shorter than the minimum frame size.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum size required
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// STUN magic cookie mismatch.
    #[error("invalid STUN magic cookie")]
    InvalidMagic,

    /// Message type is not the one expected at this point of the exchange.
    #[error("unexpected message type {0:#06x}")]
    UnexpectedType(u16),

    /// Protocol version byte is not the supported one.
    #[error("unsupported protocol version {0:#04x}")]
    UnsupportedVersion(u8),

    /// Address family tag is neither IPv4 nor IPv6.
    #[error("unknown address family {0:#04x}")]
    UnknownAddressFamily(u8),

    /// An attribute or field runs past the declared frame length.
    #[error("frame truncated: field runs past declared length")]
    Truncated,

    /// No MAPPED-ADDRESS or XOR-MAPPED-ADDRESS attribute in a response.
    #[error("no mapped address attribute in binding response")]
    MissingMappedAddress,

    /// Domain names in SOCKS5 requests carry a single length byte.
    #[error("domain name too long for SOCKS5 request: {0} bytes")]
    DomainTooLong(usize),

    /// The greeting carries a single count byte for offered methods.
    #[error("too many auth methods for one greeting: {0}")]
    TooManyAuthMethods(usize),

    /// A domain name in a reply must be valid UTF-8.
    #[error("bound domain is not valid UTF-8")]
    InvalidDomain,
}

/// Failure while establishing a SOCKS5 connection.
///
/// Wraps the underlying I/O or frame error so callers see a single
/// negotiation-failure type with the cause attached.
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// I/O failure on the underlying stream.
    #[error("I/O error during negotiation: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame received from the proxy.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Server answered the greeting with 0xFF (no acceptable method).
    #[error("server accepted none of the offered auth methods")]
    NoAcceptableMethod,

    /// Server selected a method the client never offered.
    #[error("server selected auth method {0:#04x} that was not offered")]
    UnexpectedMethod(u8),

    /// Username/password sub-negotiation rejected.
    #[error("username/password authentication rejected (status {0:#04x})")]
    AuthRejected(u8),

    /// Proxy refused the connect request.
    #[error("connect request refused by proxy (reply code {0:#04x})")]
    RequestRefused(u8),
}
