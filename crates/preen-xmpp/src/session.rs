//! Session wiring: one router, one registry, one pipeline.
//!
//! The session owns the inbound path. Correlated IQ replies are consumed
//! by the router before any filter sees them; everything else runs
//! through the pipeline, and only unclaimed stanzas reach the
//! application channel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType, StanzaError};

use crate::config::SessionConfig;
use crate::correlate::IqRouter;
use crate::error::ClientError;
use crate::pipeline::{Delivery, OutboundAction, StanzaPipeline};
use crate::registry::ExtensionRegistry;
use crate::stanza::Stanza;

/// One client session.
pub struct Session {
    config: SessionConfig,
    router: Arc<IqRouter>,
    registry: Arc<ExtensionRegistry>,
    pipeline: StanzaPipeline,
    app: mpsc::UnboundedSender<Stanza>,
}

impl Session {
    /// Build a session around `config`.
    ///
    /// Returns the session, the wire receiver (stanzas to be written to
    /// the stream) and the application receiver (inbound stanzas no
    /// extension claimed).
    pub fn new(
        config: SessionConfig,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<Stanza>,
        mpsc::UnboundedReceiver<Stanza>,
    ) {
        let (wire_tx, wire_rx) = mpsc::unbounded_channel();
        let (app_tx, app_rx) = mpsc::unbounded_channel();

        let router = Arc::new(IqRouter::new(wire_tx));
        let registry = ExtensionRegistry::build(router.clone(), &config);
        let mut pipeline = StanzaPipeline::new();
        for filter in registry.filters() {
            pipeline.register(filter);
        }

        let session = Self {
            config,
            router,
            registry,
            pipeline,
            app: app_tx,
        };
        (session, wire_rx, app_rx)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<IqRouter> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    /// Feed one stanza received from the stream into the session.
    ///
    /// IQ results and errors are routed to their pending request and never
    /// reach the pipeline. A filter failure on an IQ request produces an
    /// internal-server-error reply so the peer is not left waiting.
    pub fn handle_inbound(&self, stanza: Stanza) -> Delivery {
        if let Stanza::Iq(iq) = &stanza {
            if matches!(iq.payload, IqType::Result(_) | IqType::Error(_)) {
                self.router.route_reply(iq);
                return Delivery::Claimed { by: "iq-router" };
            }
        }

        let delivery = self.pipeline.dispatch_inbound(&stanza);
        match delivery {
            Delivery::Claimed { by } => {
                debug!(filter = by, kind = ?stanza.kind(), "stanza claimed");
            }
            Delivery::Failed { by } => {
                warn!(filter = by, kind = ?stanza.kind(), "filter failed on inbound stanza");
                if let Stanza::Iq(iq) = &stanza {
                    self.reply_internal_error(iq);
                }
            }
            Delivery::Unclaimed => {
                // receiver gone means the application is shutting down
                let _ = self.app.send(stanza);
            }
        }
        delivery
    }

    /// Send `stanza`, after every filter had a chance to rewrite or veto
    /// it. A vetoed stanza is dropped without error.
    pub fn send(&self, mut stanza: Stanza) -> Result<(), ClientError> {
        if self.pipeline.rewrite_outbound(&mut stanza) == OutboundAction::Veto {
            return Ok(());
        }
        self.router.send(stanza)
    }

    /// Tear the session down, failing every pending request.
    pub fn shutdown(&self) {
        self.router.shutdown();
    }

    #[cfg(test)]
    fn register_filter(&mut self, filter: Arc<dyn crate::pipeline::StanzaFilter>) {
        self.pipeline.register(filter);
    }

    fn reply_internal_error(&self, request: &Iq) {
        let error = StanzaError::new(
            ErrorType::Cancel,
            DefinedCondition::InternalServerError,
            "en",
            "internal error while handling the request",
        );
        let reply = Iq {
            from: None,
            to: request.from.clone(),
            id: request.id.clone(),
            payload: IqType::Error(error),
        };
        if let Err(error) = self.router.send(Stanza::Iq(Box::new(reply))) {
            warn!(%error, "failed to send error reply");
        }
    }
}
