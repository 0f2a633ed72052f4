//! Out-of-band bytestream negotiation for Preen.
//!
//! Two self-contained binary codecs used by the file-transfer layer to
//! establish a direct or relayed byte stream:
//!
//! - [`socks5`]: the client side of SOCKS5 proxy negotiation (RFC 1928,
//!   username/password auth per RFC 1929).
//! - [`stun`]: encoding of STUN binding requests and decoding of binding
//!   responses, enough to learn this host's reflexive address.
//!
//! The STUN codec operates purely on byte buffers; the SOCKS5 driver runs
//! over any `AsyncRead + AsyncWrite` stream. Neither opens sockets itself.

pub mod error;
pub mod socks5;
pub mod stun;

pub use error::{FrameError, NegotiationError};
pub use socks5::{AuthMethod, Command, Credentials, Socks5Client, TargetAddr};
pub use stun::{BindingRequest, BindingResponse, MAGIC_COOKIE};
