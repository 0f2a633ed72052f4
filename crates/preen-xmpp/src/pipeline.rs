//! The stanza-dispatch pipeline.
//!
//! Every inbound stanza is offered to the filters registered for its kind,
//! in registration order, until one claims it; claimed stanzas never reach
//! application-level listeners. Outbound stanzas run through every
//! filter's rewrite hook, with no claim semantics.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::ClientError;
use crate::stanza::{Stanza, StanzaKind};

/// Outcome of offering an inbound stanza to a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    /// The filter consumed the stanza; dispatch stops.
    Claimed,
    /// Not interesting to this filter; offer it to the next one.
    Pass,
}

/// Outcome of a filter's outbound hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundAction {
    /// Keep the stanza, possibly rewritten.
    Continue,
    /// Drop the stanza instead of sending it.
    Veto,
}

/// What the pipeline ultimately did with an inbound stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A filter claimed the stanza.
    Claimed {
        /// Name of the claiming filter
        by: &'static str,
    },
    /// A filter returned an error; the stanza is consumed, the loop
    /// survives.
    Failed {
        /// Name of the failing filter
        by: &'static str,
    },
    /// No filter claimed it; deliver to application-level listeners.
    Unclaimed,
}

/// One extension's view of the stanza stream.
///
/// A filter receiving a malformed stanza it is not responsible for
/// validating should return `Pass`, not an error; errors are reserved for
/// failures inside the filter's own domain.
pub trait StanzaFilter: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Stanza kinds this filter wants to observe inbound.
    fn kinds(&self) -> &'static [StanzaKind];

    fn handle_inbound(&self, stanza: &Stanza) -> Result<FilterOutcome, ClientError>;

    /// Hook for outgoing stanzas: rewrite in place or veto the send.
    /// All registered filters run, with no claim semantics.
    fn rewrite_outbound(&self, _stanza: &mut Stanza) -> OutboundAction {
        OutboundAction::Continue
    }
}

/// Ordered set of filters for one session.
#[derive(Default)]
pub struct StanzaPipeline {
    filters: Vec<Arc<dyn StanzaFilter>>,
}

impl StanzaPipeline {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Append a filter; registration order is dispatch order.
    pub fn register(&mut self, filter: Arc<dyn StanzaFilter>) {
        self.filters.push(filter);
    }

    /// Offer an inbound stanza to every interested filter in order.
    ///
    /// A filter error consumes the stanza but never breaks the dispatch
    /// loop for later stanzas.
    pub fn dispatch_inbound(&self, stanza: &Stanza) -> Delivery {
        let kind = stanza.kind();
        for filter in &self.filters {
            if !filter.kinds().contains(&kind) {
                continue;
            }
            match filter.handle_inbound(stanza) {
                Ok(FilterOutcome::Claimed) => {
                    debug!(filter = filter.name(), stanza = stanza.name(), "stanza claimed");
                    return Delivery::Claimed { by: filter.name() };
                }
                Ok(FilterOutcome::Pass) => {}
                Err(error) => {
                    warn!(
                        filter = filter.name(),
                        stanza = stanza.name(),
                        error = %error,
                        "filter failed while handling inbound stanza"
                    );
                    return Delivery::Failed { by: filter.name() };
                }
            }
        }
        Delivery::Unclaimed
    }

    /// Run every filter's outbound hook over an outgoing stanza.
    ///
    /// Every filter runs even after a veto; the combined action is `Veto`
    /// when any filter vetoed.
    pub fn rewrite_outbound(&self, stanza: &mut Stanza) -> OutboundAction {
        let mut action = OutboundAction::Continue;
        for filter in &self.filters {
            if filter.rewrite_outbound(stanza) == OutboundAction::Veto {
                debug!(filter = filter.name(), stanza = stanza.name(), "outbound stanza vetoed");
                action = OutboundAction::Veto;
            }
        }
        action
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingFilter {
        name: &'static str,
        kinds: &'static [StanzaKind],
        outcome: fn() -> Result<FilterOutcome, ClientError>,
        seen: AtomicUsize,
    }

    impl CountingFilter {
        fn new(
            name: &'static str,
            kinds: &'static [StanzaKind],
            outcome: fn() -> Result<FilterOutcome, ClientError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                kinds,
                outcome,
                seen: AtomicUsize::new(0),
            })
        }
    }

    impl StanzaFilter for CountingFilter {
        fn name(&self) -> &'static str {
            self.name
        }

        fn kinds(&self) -> &'static [StanzaKind] {
            self.kinds
        }

        fn handle_inbound(&self, _stanza: &Stanza) -> Result<FilterOutcome, ClientError> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn ping_iq() -> Stanza {
        Stanza::parse(
            b"<iq xmlns='jabber:client' type='get' id='p1'><ping xmlns='urn:xmpp:ping'/></iq>",
        )
        .unwrap()
    }

    #[test]
    fn claim_stops_dispatch_before_later_filters() {
        let first = CountingFilter::new("first", &[StanzaKind::Iq], || Ok(FilterOutcome::Claimed));
        let second = CountingFilter::new("second", &[StanzaKind::Iq], || Ok(FilterOutcome::Pass));

        let mut pipeline = StanzaPipeline::new();
        pipeline.register(first.clone());
        pipeline.register(second.clone());

        let delivery = pipeline.dispatch_inbound(&ping_iq());
        assert_eq!(delivery, Delivery::Claimed { by: "first" });
        assert_eq!(first.seen.load(Ordering::SeqCst), 1);
        assert_eq!(second.seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn pass_through_all_filters_is_unclaimed() {
        let first = CountingFilter::new("first", &[StanzaKind::Iq], || Ok(FilterOutcome::Pass));
        let second = CountingFilter::new("second", &[StanzaKind::Iq], || Ok(FilterOutcome::Pass));

        let mut pipeline = StanzaPipeline::new();
        pipeline.register(first.clone());
        pipeline.register(second.clone());

        assert_eq!(pipeline.dispatch_inbound(&ping_iq()), Delivery::Unclaimed);
        assert_eq!(first.seen.load(Ordering::SeqCst), 1);
        assert_eq!(second.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn filters_only_see_their_registered_kinds() {
        let message_only =
            CountingFilter::new("messages", &[StanzaKind::Message], || {
                Ok(FilterOutcome::Claimed)
            });

        let mut pipeline = StanzaPipeline::new();
        pipeline.register(message_only.clone());

        assert_eq!(pipeline.dispatch_inbound(&ping_iq()), Delivery::Unclaimed);
        assert_eq!(message_only.seen.load(Ordering::SeqCst), 0);
    }

    struct OutboundFilter {
        name: &'static str,
        action: OutboundAction,
        seen: AtomicUsize,
    }

    impl StanzaFilter for OutboundFilter {
        fn name(&self) -> &'static str {
            self.name
        }

        fn kinds(&self) -> &'static [StanzaKind] {
            &[]
        }

        fn handle_inbound(&self, _stanza: &Stanza) -> Result<FilterOutcome, ClientError> {
            Ok(FilterOutcome::Pass)
        }

        fn rewrite_outbound(&self, _stanza: &mut Stanza) -> OutboundAction {
            self.seen.fetch_add(1, Ordering::SeqCst);
            self.action
        }
    }

    #[test]
    fn veto_by_any_filter_wins_but_all_filters_still_run() {
        let vetoing = Arc::new(OutboundFilter {
            name: "vetoing",
            action: OutboundAction::Veto,
            seen: AtomicUsize::new(0),
        });
        let passive = Arc::new(OutboundFilter {
            name: "passive",
            action: OutboundAction::Continue,
            seen: AtomicUsize::new(0),
        });

        let mut pipeline = StanzaPipeline::new();
        pipeline.register(vetoing.clone());
        pipeline.register(passive.clone());

        let mut stanza = ping_iq();
        assert_eq!(pipeline.rewrite_outbound(&mut stanza), OutboundAction::Veto);
        assert_eq!(vetoing.seen.load(Ordering::SeqCst), 1);
        assert_eq!(passive.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn filter_error_consumes_stanza_but_loop_survives() {
        let failing = CountingFilter::new("failing", &[StanzaKind::Iq], || {
            Err(ClientError::Protocol("boom".into()))
        });

        let mut pipeline = StanzaPipeline::new();
        pipeline.register(failing.clone());

        assert_eq!(
            pipeline.dispatch_inbound(&ping_iq()),
            Delivery::Failed { by: "failing" }
        );
        // a later stanza still dispatches
        assert_eq!(
            pipeline.dispatch_inbound(&ping_iq()),
            Delivery::Failed { by: "failing" }
        );
        assert_eq!(failing.seen.load(Ordering::SeqCst), 2);
    }
}
