//! SOCKS5 proxy negotiation, client role only.
//!
//! Frame encoding/decoding is split out as pure functions so it can be
//! unit tested without sockets; [`Socks5Client::connect`] drives the
//! exchange over any `AsyncRead + AsyncWrite` stream:
//!
//! `Connected -> GreetingSent -> (AuthSent ->) Negotiated`
//!
//! All multi-byte integers are big-endian on the wire.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{FrameError, NegotiationError};

/// Protocol version byte carried on every SOCKS5 message.
pub const SOCKS_VERSION: u8 = 0x05;

/// Version byte of the RFC 1929 username/password sub-negotiation.
const AUTH_VERSION: u8 = 0x01;
const AUTH_SUCCESS: u8 = 0x00;
const NO_ACCEPTABLE_METHOD: u8 = 0xFF;
const REPLY_SUCCEEDED: u8 = 0x00;
const RESERVED: u8 = 0x00;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Authentication methods this client can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthMethod {
    /// No authentication required.
    None = 0x00,
    /// RFC 1929 username/password.
    UserPass = 0x02,
}

/// SOCKS5 request commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Establish a TCP connection through the proxy.
    Connect = 0x01,
}

/// Target of a SOCKS5 request: a literal address or a proxy-resolved name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// Literal IPv4/IPv6 address and port.
    Ip(SocketAddr),
    /// Domain name resolved by the proxy, plus port.
    Domain(String, u16),
}

/// Username/password credentials for the auth sub-negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Username, at most 255 bytes.
    pub username: String,
    /// Password, at most 255 bytes.
    pub password: String,
}

/// Encode the client greeting: `[version, n_methods, method...]`.
pub fn encode_greeting(methods: &[AuthMethod]) -> Result<Vec<u8>, FrameError> {
    if methods.len() > u8::MAX as usize {
        return Err(FrameError::TooManyAuthMethods(methods.len()));
    }
    let mut buf = Vec::with_capacity(2 + methods.len());
    buf.push(SOCKS_VERSION);
    buf.push(methods.len() as u8);
    buf.extend(methods.iter().map(|method| *method as u8));
    Ok(buf)
}

/// Encode the RFC 1929 username/password request.
pub fn encode_auth_request(credentials: &Credentials) -> Result<Vec<u8>, FrameError> {
    let username = credentials.username.as_bytes();
    let password = credentials.password.as_bytes();
    if username.len() > u8::MAX as usize {
        return Err(FrameError::DomainTooLong(username.len()));
    }
    if password.len() > u8::MAX as usize {
        return Err(FrameError::DomainTooLong(password.len()));
    }

    let mut buf = Vec::with_capacity(3 + username.len() + password.len());
    buf.push(AUTH_VERSION);
    buf.push(username.len() as u8);
    buf.extend_from_slice(username);
    buf.push(password.len() as u8);
    buf.extend_from_slice(password);
    Ok(buf)
}

/// Encode a command request: `[version, command, reserved, atyp, address, port]`.
pub fn encode_request(command: Command, target: &TargetAddr) -> Result<Vec<u8>, FrameError> {
    let mut buf = vec![SOCKS_VERSION, command as u8, RESERVED];
    match target {
        TargetAddr::Ip(SocketAddr::V4(addr)) => {
            buf.push(ATYP_IPV4);
            buf.extend_from_slice(&addr.ip().octets());
            buf.extend_from_slice(&addr.port().to_be_bytes());
        }
        TargetAddr::Ip(SocketAddr::V6(addr)) => {
            buf.push(ATYP_IPV6);
            buf.extend_from_slice(&addr.ip().octets());
            buf.extend_from_slice(&addr.port().to_be_bytes());
        }
        TargetAddr::Domain(domain, port) => {
            let name = domain.as_bytes();
            if name.len() > u8::MAX as usize {
                return Err(FrameError::DomainTooLong(name.len()));
            }
            buf.push(ATYP_DOMAIN);
            buf.push(name.len() as u8);
            buf.extend_from_slice(name);
            buf.extend_from_slice(&port.to_be_bytes());
        }
    }
    Ok(buf)
}

/// Client side of the SOCKS5 negotiation.
#[derive(Debug, Clone, Default)]
pub struct Socks5Client {
    credentials: Option<Credentials>,
}

impl Socks5Client {
    /// Client offering only the no-auth method.
    pub fn new() -> Self {
        Self { credentials: None }
    }

    /// Client additionally offering username/password auth.
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: Some(credentials),
        }
    }

    /// Run the full negotiation for a CONNECT to `target`.
    ///
    /// Returns the address the proxy bound for the relayed stream. Any
    /// refusal, auth failure or malformed reply aborts the attempt with a
    /// [`NegotiationError`] carrying the cause.
    pub async fn connect<S>(
        &self,
        stream: &mut S,
        target: &TargetAddr,
    ) -> Result<TargetAddr, NegotiationError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut offered = vec![AuthMethod::None];
        if self.credentials.is_some() {
            offered.push(AuthMethod::UserPass);
        }
        stream.write_all(&encode_greeting(&offered)?).await?;

        let mut selection = [0u8; 2];
        stream.read_exact(&mut selection).await?;
        if selection[0] != SOCKS_VERSION {
            return Err(FrameError::UnsupportedVersion(selection[0]).into());
        }

        match selection[1] {
            NO_ACCEPTABLE_METHOD => return Err(NegotiationError::NoAcceptableMethod),
            method if method == AuthMethod::None as u8 => {}
            method if method == AuthMethod::UserPass as u8 => match &self.credentials {
                Some(credentials) => authenticate(stream, credentials).await?,
                None => return Err(NegotiationError::UnexpectedMethod(method)),
            },
            method => return Err(NegotiationError::UnexpectedMethod(method)),
        }

        stream
            .write_all(&encode_request(Command::Connect, target)?)
            .await?;

        let bound = read_reply(stream).await?;
        debug!(?bound, "SOCKS5 negotiation complete");
        Ok(bound)
    }
}

async fn authenticate<S>(stream: &mut S, credentials: &Credentials) -> Result<(), NegotiationError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&encode_auth_request(credentials)?).await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply[0] != AUTH_VERSION {
        return Err(FrameError::UnsupportedVersion(reply[0]).into());
    }
    if reply[1] != AUTH_SUCCESS {
        return Err(NegotiationError::AuthRejected(reply[1]));
    }
    Ok(())
}

/// Read the server reply, whose bound-address encoding depends on `atyp`.
async fn read_reply<S>(stream: &mut S) -> Result<TargetAddr, NegotiationError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[0] != SOCKS_VERSION {
        return Err(FrameError::UnsupportedVersion(head[0]).into());
    }
    if head[1] != REPLY_SUCCEEDED {
        return Err(NegotiationError::RequestRefused(head[1]));
    }

    match head[3] {
        ATYP_IPV4 => {
            let mut buf = [0u8; 6];
            stream.read_exact(&mut buf).await?;
            let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
            let port = u16::from_be_bytes([buf[4], buf[5]]);
            Ok(TargetAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port)))
        }
        ATYP_IPV6 => {
            let mut buf = [0u8; 18];
            stream.read_exact(&mut buf).await?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[..16]);
            let port = u16::from_be_bytes([buf[16], buf[17]]);
            Ok(TargetAddr::Ip(SocketAddr::new(
                IpAddr::V6(Ipv6Addr::from(octets)),
                port,
            )))
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await?;
            let mut port = [0u8; 2];
            stream.read_exact(&mut port).await?;
            let domain = String::from_utf8(name).map_err(|_| FrameError::InvalidDomain)?;
            Ok(TargetAddr::Domain(domain, u16::from_be_bytes(port)))
        }
        other => Err(FrameError::UnknownAddressFamily(other).into()),
    }
}
