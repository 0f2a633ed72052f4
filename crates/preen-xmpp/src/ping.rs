//! XMPP ping (XEP-0199): outbound liveness probes and the inbound
//! responder.

use std::sync::Arc;
use std::time::Duration;

use jid::Jid;
use minidom::Element;
use tracing::debug;
use xmpp_parsers::iq::{Iq, IqType};

use crate::config::SessionConfig;
use crate::correlate::{reply_payload, IqRouter};
use crate::error::ClientError;
use crate::pipeline::{FilterOutcome, StanzaFilter};
use crate::registry::{Extension, ExtensionDescriptor};
use crate::stanza::{Stanza, StanzaKind};

pub const PING_NS: &str = "urn:xmpp:ping";

/// Ping extension. Answers inbound pings and measures round trips.
pub struct Ping {
    router: Arc<IqRouter>,
    config: SessionConfig,
}

impl Ping {
    pub(crate) fn new(router: Arc<IqRouter>, config: SessionConfig) -> Self {
        Self { router, config }
    }

    /// Ping `jid` and return the measured round-trip time.
    pub async fn ping(&self, jid: &Jid) -> Result<Duration, ClientError> {
        let iq = Iq {
            from: None,
            to: Some(jid.clone()),
            id: String::new(),
            payload: IqType::Get(Element::builder("ping", PING_NS).build()),
        };
        let started = tokio::time::Instant::now();
        let reply = self.router.request(iq, self.config.default_timeout).await?;
        reply_payload(reply)?;
        Ok(started.elapsed())
    }
}

impl Extension for Ping {
    fn descriptor(&self) -> ExtensionDescriptor {
        ExtensionDescriptor {
            name: "ping",
            namespaces: &[PING_NS],
            capability: PING_NS,
        }
    }
}

impl StanzaFilter for Ping {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn kinds(&self) -> &'static [StanzaKind] {
        &[StanzaKind::Iq]
    }

    fn handle_inbound(&self, stanza: &Stanza) -> Result<FilterOutcome, ClientError> {
        let Stanza::Iq(iq) = stanza else {
            return Ok(FilterOutcome::Pass);
        };
        let IqType::Get(payload) = &iq.payload else {
            return Ok(FilterOutcome::Pass);
        };
        if !payload.is("ping", PING_NS) {
            return Ok(FilterOutcome::Pass);
        }

        debug!(from = ?iq.from, id = %iq.id, "answering ping");
        self.router.send(Stanza::Iq(Box::new(Iq {
            from: iq.to.clone(),
            to: iq.from.clone(),
            id: iq.id.clone(),
            payload: IqType::Result(None),
        })))?;
        Ok(FilterOutcome::Claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping_extension() -> (Ping, tokio::sync::mpsc::UnboundedReceiver<Stanza>) {
        let (wire, wire_rx) = tokio::sync::mpsc::unbounded_channel();
        let config = SessionConfig::new("alice@example.com/preen".parse().unwrap());
        (Ping::new(Arc::new(IqRouter::new(wire)), config), wire_rx)
    }

    #[tokio::test]
    async fn inbound_ping_get_is_answered_with_empty_result() {
        let (ping, mut wire_rx) = ping_extension();
        let stanza = Stanza::parse(
            b"<iq xmlns='jabber:client' type='get' id='p1' from='example.com'>\
                <ping xmlns='urn:xmpp:ping'/>\
            </iq>",
        )
        .unwrap();

        assert_eq!(ping.handle_inbound(&stanza).unwrap(), FilterOutcome::Claimed);

        let reply = wire_rx.recv().await.unwrap();
        let Stanza::Iq(reply) = reply else {
            panic!("expected iq reply");
        };
        assert_eq!(reply.id, "p1");
        assert_eq!(reply.to.as_ref().map(ToString::to_string).as_deref(), Some("example.com"));
        assert!(matches!(reply.payload, IqType::Result(None)));
    }

    #[tokio::test]
    async fn non_ping_iq_passes() {
        let (ping, _wire_rx) = ping_extension();
        let stanza = Stanza::parse(
            b"<iq xmlns='jabber:client' type='get' id='q1'>\
                <query xmlns='http://jabber.org/protocol/disco#info'/>\
            </iq>",
        )
        .unwrap();
        assert_eq!(ping.handle_inbound(&stanza).unwrap(), FilterOutcome::Pass);
    }
}
