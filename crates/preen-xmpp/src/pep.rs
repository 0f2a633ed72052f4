//! Personal eventing: node subscriptions, event routing, publishing and
//! item retrieval.
//!
//! Each node has at most one registered callback; event notifications for
//! a subscribed node are claimed and never propagate to generic
//! application listeners.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use jid::Jid;
use minidom::Element;
use tokio::sync::OnceCell;
use tracing::debug;
use xmpp_parsers::iq::{Iq, IqType};

use crate::config::SessionConfig;
use crate::correlate::{reply_payload, IqRouter};
use crate::disco::ServiceDiscovery;
use crate::error::ClientError;
use crate::pipeline::{FilterOutcome, StanzaFilter};
use crate::registry::{Extension, ExtensionDescriptor, ExtensionRegistry};
use crate::stanza::{Stanza, StanzaKind};

/// PubSub namespace (XEP-0060).
pub const PUBSUB_NS: &str = "http://jabber.org/protocol/pubsub";

/// PubSub event namespace carried in notifications.
pub const PUBSUB_EVENT_NS: &str = "http://jabber.org/protocol/pubsub#event";

/// One received event notification.
#[derive(Debug, Clone)]
pub struct PepEvent {
    /// Publisher the notification came from.
    pub from: Option<Jid>,
    /// Node the item was published to.
    pub node: String,
    /// Item id, when the publisher supplied one.
    pub id: Option<String>,
    /// The item payload.
    pub payload: Option<Element>,
}

/// A published item retrieved from a node.
#[derive(Debug, Clone, PartialEq)]
pub struct PepItem {
    pub id: Option<String>,
    pub payload: Option<Element>,
}

impl PepItem {
    fn from_element(element: &Element) -> Self {
        Self {
            id: element.attr("id").map(String::from),
            payload: element.children().next().cloned(),
        }
    }
}

type EventCallback = Arc<dyn Fn(PepEvent) + Send + Sync + 'static>;

/// Personal eventing extension.
pub struct Pep {
    router: Arc<IqRouter>,
    config: SessionConfig,
    subscriptions: Mutex<HashMap<String, EventCallback>>,
    disco: OnceLock<Arc<ServiceDiscovery>>,
    // one-time probe of the own server's pubsub identity
    server_support: OnceCell<bool>,
}

impl Pep {
    pub(crate) fn new(router: Arc<IqRouter>, config: SessionConfig) -> Self {
        Self {
            router,
            config,
            subscriptions: Mutex::new(HashMap::new()),
            disco: OnceLock::new(),
            server_support: OnceCell::new(),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, EventCallback>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback` for event notifications on `node`.
    ///
    /// Exactly one callback may exist per node; a second registration is
    /// rejected without replacing the first.
    pub fn subscribe(
        &self,
        node: &str,
        callback: impl Fn(PepEvent) + Send + Sync + 'static,
    ) -> Result<(), ClientError> {
        if node.is_empty() {
            return Err(ClientError::InvalidArgument(
                "subscription node must not be empty".to_string(),
            ));
        }
        let mut table = self.table();
        if table.contains_key(node) {
            return Err(ClientError::DuplicateSubscription(node.to_string()));
        }
        table.insert(node.to_string(), Arc::new(callback));
        Ok(())
    }

    /// Remove the callback for `node`. No-op when nothing is registered.
    pub fn unsubscribe(&self, node: &str) {
        self.table().remove(node);
    }

    /// Publish `payload` as an item on `node` of the own account.
    ///
    /// Fails with [`ClientError::Unsupported`] unless the own server has
    /// been confirmed to offer personal eventing; the probe runs once per
    /// session and is cached.
    pub async fn publish(
        &self,
        node: &str,
        item_id: Option<&str>,
        payload: Element,
    ) -> Result<(), ClientError> {
        if node.is_empty() {
            return Err(ClientError::InvalidArgument(
                "publish node must not be empty".to_string(),
            ));
        }
        if !self.server_supports_pep().await? {
            return Err(ClientError::Unsupported {
                jid: self.config.server().to_string(),
                feature: PUBSUB_NS.to_string(),
            });
        }

        let mut item = Element::builder("item", PUBSUB_NS);
        if let Some(id) = item_id {
            item = item.attr("id", id);
        }
        let publish = Element::builder("publish", PUBSUB_NS)
            .attr("node", node)
            .append(item.append(payload).build())
            .build();
        let pubsub = Element::builder("pubsub", PUBSUB_NS).append(publish).build();

        let iq = Iq {
            from: None,
            to: None,
            id: String::new(),
            payload: IqType::Set(pubsub),
        };
        let reply = self.router.request(iq, self.config.default_timeout).await?;
        reply_payload(reply)?;
        debug!(node, "published pep item");
        Ok(())
    }

    /// Retrieve all items of `node` at `jid`.
    pub async fn retrieve_items(
        &self,
        jid: &Jid,
        node: &str,
    ) -> Result<Vec<PepItem>, ClientError> {
        let items = Element::builder("items", PUBSUB_NS).attr("node", node).build();
        let reply_items = self.items_request(jid, node, items).await?;
        Ok(reply_items
            .children()
            .filter(|child| child.name() == "item")
            .map(PepItem::from_element)
            .collect())
    }

    /// Retrieve one specific item of `node` at `jid`.
    pub async fn retrieve_item(
        &self,
        jid: &Jid,
        node: &str,
        item_id: &str,
    ) -> Result<Option<PepItem>, ClientError> {
        let items = Element::builder("items", PUBSUB_NS)
            .attr("node", node)
            .append(Element::builder("item", PUBSUB_NS).attr("id", item_id).build())
            .build();
        let reply_items = self.items_request(jid, node, items).await?;
        Ok(reply_items
            .children()
            .filter(|child| child.name() == "item")
            .find(|child| child.attr("id") == Some(item_id))
            .map(PepItem::from_element))
    }

    /// Issue an items query and validate that the reply echoes the node.
    async fn items_request(
        &self,
        jid: &Jid,
        node: &str,
        items: Element,
    ) -> Result<Element, ClientError> {
        let pubsub = Element::builder("pubsub", PUBSUB_NS).append(items).build();
        let iq = Iq {
            from: None,
            to: Some(jid.clone()),
            id: String::new(),
            payload: IqType::Get(pubsub),
        };
        let reply = self.router.request(iq, self.config.default_timeout).await?;
        let payload = reply_payload(reply)?
            .ok_or_else(|| ClientError::Protocol("empty pubsub result".to_string()))?;
        if !payload.is("pubsub", PUBSUB_NS) {
            return Err(ClientError::Protocol(format!(
                "pubsub reply in wrong namespace: {}",
                payload.ns()
            )));
        }
        let reply_items = payload
            .get_child("items", PUBSUB_NS)
            .ok_or_else(|| ClientError::Protocol("pubsub result missing items".to_string()))?;
        if reply_items.attr("node") != Some(node) {
            return Err(ClientError::Protocol(format!(
                "pubsub reply for wrong node: expected '{node}', got {:?}",
                reply_items.attr("node")
            )));
        }
        Ok(reply_items.clone())
    }

    async fn server_supports_pep(&self) -> Result<bool, ClientError> {
        let disco = self
            .disco
            .get()
            .ok_or_else(|| ClientError::Protocol("pep extension not initialized".to_string()))?;
        let server = self.config.server();
        let supported = self
            .server_support
            .get_or_try_init(|| async {
                let identities = disco.identities(&server).await?;
                Ok::<bool, ClientError>(identities.iter().any(|identity| {
                    identity.category == "pubsub"
                        && (identity.type_ == "pep" || identity.type_ == "service")
                }))
            })
            .await?;
        Ok(*supported)
    }
}

impl Extension for Pep {
    fn descriptor(&self) -> ExtensionDescriptor {
        ExtensionDescriptor {
            name: "pep",
            namespaces: &[PUBSUB_NS, PUBSUB_EVENT_NS],
            capability: PUBSUB_NS,
        }
    }

    fn initialize(&self, registry: &Arc<ExtensionRegistry>) {
        let _ = self.disco.set(registry.disco().clone());
    }
}

impl StanzaFilter for Pep {
    fn name(&self) -> &'static str {
        "pep"
    }

    fn kinds(&self) -> &'static [StanzaKind] {
        &[StanzaKind::Message]
    }

    /// Route event notifications for subscribed nodes.
    fn handle_inbound(&self, stanza: &Stanza) -> Result<FilterOutcome, ClientError> {
        let Stanza::Message(message) = stanza else {
            return Ok(FilterOutcome::Pass);
        };
        let Some(event) = message
            .payloads
            .iter()
            .find(|payload| payload.is("event", PUBSUB_EVENT_NS))
        else {
            return Ok(FilterOutcome::Pass);
        };
        // malformed notifications pass through rather than erroring here
        let Some(items) = event.get_child("items", PUBSUB_EVENT_NS) else {
            return Ok(FilterOutcome::Pass);
        };
        let Some(node) = items.attr("node") else {
            return Ok(FilterOutcome::Pass);
        };

        let callback = match self.table().get(node) {
            Some(callback) => callback.clone(),
            None => return Ok(FilterOutcome::Pass),
        };

        for item in items.children().filter(|child| child.name() == "item") {
            callback(PepEvent {
                from: message.from.clone(),
                node: node.to_string(),
                id: item.attr("id").map(String::from),
                payload: item.children().next().cloned(),
            });
        }
        debug!(node, "routed pep event notification");
        Ok(FilterOutcome::Claimed)
    }
}
