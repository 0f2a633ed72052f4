//! Service discovery and the per-entity capability cache.
//!
//! Answers "does entity X support capability Y" by lazily issuing one
//! disco query per entity and aspect, caching the decoded result for the
//! rest of the session. Also answers inbound disco#info queries about this
//! client with its own identity and the full advertised namespace set.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use jid::Jid;
use minidom::Element;
use tracing::debug;
use xmpp_parsers::iq::{Iq, IqType};

use crate::config::SessionConfig;
use crate::correlate::{reply_payload, IqRouter};
use crate::error::ClientError;
use crate::pipeline::{FilterOutcome, StanzaFilter};
use crate::registry::{Extension, ExtensionDescriptor, ExtensionRegistry};
use crate::stanza::{Stanza, StanzaKind};

/// Service discovery info namespace (XEP-0030).
pub const DISCO_INFO_NS: &str = "http://jabber.org/protocol/disco#info";

/// Service discovery items namespace (XEP-0030).
pub const DISCO_ITEMS_NS: &str = "http://jabber.org/protocol/disco#items";

const IDENTITY_CATEGORY: &str = "client";
const IDENTITY_TYPE: &str = "pc";
const IDENTITY_NAME: &str = "preen";

/// Identity advertised by an entity in disco#info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub category: String,
    pub type_: String,
    pub name: Option<String>,
}

/// One entry of a disco#items listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoItem {
    pub jid: String,
    pub node: Option<String>,
    pub name: Option<String>,
}

/// Service discovery extension: cache, query issuer, and own responder.
pub struct ServiceDiscovery {
    router: Arc<IqRouter>,
    config: SessionConfig,
    features: DashMap<String, BTreeSet<String>>,
    identities: DashMap<String, Vec<Identity>>,
    items: DashMap<String, Vec<DiscoItem>>,
    registry: OnceLock<Weak<ExtensionRegistry>>,
}

impl ServiceDiscovery {
    pub(crate) fn new(router: Arc<IqRouter>, config: SessionConfig) -> Self {
        Self {
            router,
            config,
            features: DashMap::new(),
            identities: DashMap::new(),
            items: DashMap::new(),
            registry: OnceLock::new(),
        }
    }

    /// Whether `jid` advertises every one of `features`.
    ///
    /// The first call for a given entity issues a disco#info query;
    /// subsequent calls within the session answer from the cache. Cached
    /// features are intersected with the locally known namespace set, so
    /// membership is only ever affirmed for capabilities this client
    /// itself understands.
    pub async fn supports(&self, jid: &Jid, features: &[&str]) -> Result<bool, ClientError> {
        let cached = self.features_of(jid).await?;
        Ok(features.iter().all(|feature| cached.contains(*feature)))
    }

    /// The identities `jid` advertises, lazily fetched then cached.
    pub async fn identities(&self, jid: &Jid) -> Result<Vec<Identity>, ClientError> {
        let key = jid.to_string();
        if let Some(hit) = self.identities.get(&key) {
            return Ok(hit.clone());
        }
        self.populate_info(jid).await?;
        Ok(self
            .identities
            .get(&key)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    /// The items `jid` advertises, lazily fetched then cached.
    pub async fn items(&self, jid: &Jid) -> Result<Vec<DiscoItem>, ClientError> {
        let key = jid.to_string();
        if let Some(hit) = self.items.get(&key) {
            return Ok(hit.clone());
        }

        let items = self.query_items(jid).await?;
        debug!(jid = %jid, count = items.len(), "caching disco#items");
        self.items.insert(key, items.clone());
        Ok(items)
    }

    async fn features_of(&self, jid: &Jid) -> Result<BTreeSet<String>, ClientError> {
        let key = jid.to_string();
        if let Some(hit) = self.features.get(&key) {
            return Ok(hit.clone());
        }
        self.populate_info(jid).await
    }

    async fn populate_info(&self, jid: &Jid) -> Result<BTreeSet<String>, ClientError> {
        let (identities, features) = self.query_info(jid).await?;

        let local = self.local_namespaces();
        let features: BTreeSet<String> = features
            .into_iter()
            .filter(|feature| local.contains(feature))
            .collect();

        debug!(
            jid = %jid,
            identities = identities.len(),
            features = features.len(),
            "caching disco#info"
        );
        let key = jid.to_string();
        self.identities.insert(key.clone(), identities);
        self.features.insert(key, features.clone());
        Ok(features)
    }

    async fn query_info(&self, jid: &Jid) -> Result<(Vec<Identity>, Vec<String>), ClientError> {
        let payload = self.query(jid, DISCO_INFO_NS).await?;

        let mut identities = Vec::new();
        let mut features = Vec::new();
        for child in payload.children() {
            if child.is("identity", DISCO_INFO_NS) {
                let category = child
                    .attr("category")
                    .ok_or_else(|| {
                        ClientError::Protocol("disco identity missing category".to_string())
                    })?
                    .to_string();
                let type_ = child
                    .attr("type")
                    .ok_or_else(|| {
                        ClientError::Protocol("disco identity missing type".to_string())
                    })?
                    .to_string();
                identities.push(Identity {
                    category,
                    type_,
                    name: child.attr("name").map(String::from),
                });
            } else if child.is("feature", DISCO_INFO_NS) {
                if let Some(var) = child.attr("var") {
                    features.push(var.to_string());
                }
            }
        }
        Ok((identities, features))
    }

    async fn query_items(&self, jid: &Jid) -> Result<Vec<DiscoItem>, ClientError> {
        let payload = self.query(jid, DISCO_ITEMS_NS).await?;

        let mut items = Vec::new();
        for child in payload.children() {
            if !child.is("item", DISCO_ITEMS_NS) {
                continue;
            }
            let item_jid = child
                .attr("jid")
                .ok_or_else(|| ClientError::Protocol("disco item missing jid".to_string()))?
                .to_string();
            items.push(DiscoItem {
                jid: item_jid,
                node: child.attr("node").map(String::from),
                name: child.attr("name").map(String::from),
            });
        }
        Ok(items)
    }

    /// Issue one discovery query and validate the reply namespace.
    async fn query(&self, jid: &Jid, namespace: &str) -> Result<Element, ClientError> {
        let iq = Iq {
            from: None,
            to: Some(jid.clone()),
            id: String::new(),
            payload: IqType::Get(Element::builder("query", namespace).build()),
        };
        let reply = self.router.request(iq, self.config.default_timeout).await?;
        let payload = reply_payload(reply)?
            .ok_or_else(|| ClientError::Protocol("empty discovery result".to_string()))?;
        if !payload.is("query", namespace) {
            return Err(ClientError::Protocol(format!(
                "discovery reply in wrong namespace: expected {namespace}, got {}",
                payload.ns()
            )));
        }
        Ok(payload)
    }

    fn local_namespaces(&self) -> BTreeSet<String> {
        match self.registry.get().and_then(Weak::upgrade) {
            Some(registry) => registry.advertised_namespaces(),
            None => BTreeSet::new(),
        }
    }

    fn build_info_response(&self, request: &Iq, query: &Element) -> Iq {
        let mut builder = Element::builder("query", DISCO_INFO_NS);
        if let Some(node) = query.attr("node") {
            builder = builder.attr("node", node);
        }
        builder = builder.append(
            Element::builder("identity", DISCO_INFO_NS)
                .attr("category", IDENTITY_CATEGORY)
                .attr("type", IDENTITY_TYPE)
                .attr("name", IDENTITY_NAME)
                .build(),
        );
        for namespace in self.local_namespaces() {
            builder = builder.append(
                Element::builder("feature", DISCO_INFO_NS)
                    .attr("var", namespace)
                    .build(),
            );
        }

        Iq {
            from: request.to.clone(),
            to: request.from.clone(),
            id: request.id.clone(),
            payload: IqType::Result(Some(builder.build())),
        }
    }
}

impl Extension for ServiceDiscovery {
    fn descriptor(&self) -> ExtensionDescriptor {
        ExtensionDescriptor {
            name: "disco",
            namespaces: &[DISCO_INFO_NS, DISCO_ITEMS_NS],
            capability: DISCO_INFO_NS,
        }
    }

    fn initialize(&self, registry: &Arc<ExtensionRegistry>) {
        let _ = self.registry.set(Arc::downgrade(registry));
    }
}

impl StanzaFilter for ServiceDiscovery {
    fn name(&self) -> &'static str {
        "disco"
    }

    fn kinds(&self) -> &'static [StanzaKind] {
        &[StanzaKind::Iq]
    }

    /// Answer disco#info queries about this client.
    fn handle_inbound(&self, stanza: &Stanza) -> Result<FilterOutcome, ClientError> {
        let Stanza::Iq(iq) = stanza else {
            return Ok(FilterOutcome::Pass);
        };
        let IqType::Get(query) = &iq.payload else {
            return Ok(FilterOutcome::Pass);
        };
        if !query.is("query", DISCO_INFO_NS) {
            return Ok(FilterOutcome::Pass);
        }

        let response = self.build_info_response(iq, query);
        self.router.send(Stanza::Iq(Box::new(response)))?;
        Ok(FilterOutcome::Claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_response_lists_identity_and_features() {
        let (wire, _wire_rx) = tokio::sync::mpsc::unbounded_channel();
        let config = SessionConfig::new("alice@example.com/preen".parse().unwrap());
        let disco = ServiceDiscovery::new(Arc::new(IqRouter::new(wire)), config);

        let query = Element::builder("query", DISCO_INFO_NS)
            .attr("node", "preen#info")
            .build();
        let request = Iq {
            from: Some("server.example.com".parse().unwrap()),
            to: Some("alice@example.com/preen".parse().unwrap()),
            id: "info-1".to_string(),
            payload: IqType::Get(query.clone()),
        };

        let response = disco.build_info_response(&request, &query);
        assert_eq!(response.id, "info-1");
        assert_eq!(
            response.to.as_ref().map(|j| j.to_string()),
            Some("server.example.com".to_string())
        );

        let IqType::Result(Some(payload)) = &response.payload else {
            panic!("expected result payload");
        };
        assert!(payload.is("query", DISCO_INFO_NS));
        assert_eq!(payload.attr("node"), Some("preen#info"));

        let identity = payload
            .get_child("identity", DISCO_INFO_NS)
            .expect("identity present");
        assert_eq!(identity.attr("category"), Some("client"));
        assert_eq!(identity.attr("type"), Some("pc"));
    }

    #[test]
    fn non_disco_iq_passes_through() {
        let (wire, _wire_rx) = tokio::sync::mpsc::unbounded_channel();
        let config = SessionConfig::new("alice@example.com/preen".parse().unwrap());
        let disco = ServiceDiscovery::new(Arc::new(IqRouter::new(wire)), config);

        let stanza = Stanza::parse(
            b"<iq xmlns='jabber:client' type='get' id='p1'><ping xmlns='urn:xmpp:ping'/></iq>",
        )
        .unwrap();
        assert_eq!(
            disco.handle_inbound(&stanza).unwrap(),
            FilterOutcome::Pass
        );
    }
}
