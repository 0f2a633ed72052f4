//! The stanza model: one enum over the three top-level protocol units,
//! plus the XML boundary the stream layer feeds.
//!
//! Outbound serialization happens in the stream layer via the
//! `From<Stanza> for Element` conversion; this module never touches raw
//! bytes on the way out.

use std::str::FromStr;

use minidom::Element;
use xmpp_parsers::{iq::Iq, message::Message, presence::Presence};

use crate::error::ClientError;

/// One top-level protocol message unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Stanza {
    Message(Box<Message>),
    Presence(Box<Presence>),
    Iq(Box<Iq>),
}

/// Stanza kind, the dispatch key for pipeline filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StanzaKind {
    Message,
    Presence,
    Iq,
}

impl Stanza {
    /// Decode one stanza from the bytes the stream layer handed over.
    pub fn parse(raw: &[u8]) -> Result<Self, ClientError> {
        let text = std::str::from_utf8(raw)
            .map_err(|error| ClientError::Protocol(format!("stanza is not valid UTF-8: {error}")))?;
        let element = Element::from_str(text.trim()).map_err(|error| {
            ClientError::Protocol(format!("stanza is not well-formed XML: {error}"))
        })?;
        Self::try_from(element)
    }

    pub fn to_element(&self) -> Element {
        match self {
            Stanza::Message(message) => (**message).clone().into(),
            Stanza::Presence(presence) => (**presence).clone().into(),
            Stanza::Iq(iq) => (**iq).clone().into(),
        }
    }

    pub fn kind(&self) -> StanzaKind {
        match self {
            Stanza::Message(_) => StanzaKind::Message,
            Stanza::Presence(_) => StanzaKind::Presence,
            Stanza::Iq(_) => StanzaKind::Iq,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stanza::Message(_) => "message",
            Stanza::Presence(_) => "presence",
            Stanza::Iq(_) => "iq",
        }
    }

    /// The `id` attribute, the correlation identity of the stanza.
    pub fn id(&self) -> Option<&str> {
        match self {
            Stanza::Message(message) => message.id.as_deref(),
            Stanza::Presence(presence) => presence.id.as_deref(),
            Stanza::Iq(iq) => Some(&iq.id),
        }
    }
}

impl TryFrom<Element> for Stanza {
    type Error = ClientError;

    fn try_from(element: Element) -> Result<Self, Self::Error> {
        // element is consumed by the typed conversion below
        let root = element.name().to_string();
        match root.as_str() {
            "message" => Message::try_from(element)
                .map(|message| Stanza::Message(Box::new(message)))
                .map_err(|error| ClientError::Protocol(format!("invalid <message/>: {error}"))),
            "presence" => Presence::try_from(element)
                .map(|presence| Stanza::Presence(Box::new(presence)))
                .map_err(|error| ClientError::Protocol(format!("invalid <presence/>: {error}"))),
            "iq" => Iq::try_from(element)
                .map(|iq| Stanza::Iq(Box::new(iq)))
                .map_err(|error| ClientError::Protocol(format!("invalid <iq/>: {error}"))),
            other => Err(ClientError::Protocol(format!("<{other}/> is not a stanza"))),
        }
    }
}

impl From<Stanza> for Element {
    fn from(value: Stanza) -> Self {
        match value {
            Stanza::Message(message) => (*message).into(),
            Stanza::Presence(presence) => (*presence).into(),
            Stanza::Iq(iq) => (*iq).into(),
        }
    }
}
