//! Preen XMPP client core.
//!
//! This crate is the protocol heart of a Preen client, sitting between an
//! external stream reader/writer (TLS, XML tokenizing and SASL live there)
//! and application code:
//!
//! - [`pipeline`]: ordered claim-or-pass stanza filters contributed by
//!   extensions, plus rewrite hooks for outgoing stanzas.
//! - [`registry`]: the typed extension registry with its two-phase
//!   construct/initialize lifecycle.
//! - [`correlate`]: the IQ request/response correlation engine with
//!   awaitable and callback completion, timeouts and shutdown.
//! - [`disco`]: service discovery queries, the per-entity capability
//!   cache, and the client's own disco#info responder.
//! - [`pep`]: personal eventing, covering node subscriptions, event
//!   routing, publish and item retrieval.
//! - [`ping`]: XMPP ping, the smallest IQ extension.
//!
//! [`session::Session`] wires all of it together.

pub mod config;
pub mod correlate;
pub mod disco;
pub mod error;
pub mod pep;
pub mod ping;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod stanza;

pub use config::SessionConfig;
pub use correlate::{reply_payload, IqRouter, ResponseCallback, WireSender};
pub use disco::{DiscoItem, Identity, ServiceDiscovery};
pub use error::ClientError;
pub use pep::{Pep, PepEvent, PepItem};
pub use ping::Ping;
pub use pipeline::{Delivery, FilterOutcome, OutboundAction, StanzaFilter, StanzaPipeline};
pub use registry::{Extension, ExtensionDescriptor, ExtensionRegistry};
pub use session::Session;
pub use stanza::{Stanza, StanzaKind};
