//! The typed extension registry.
//!
//! Extensions follow a two-phase lifecycle: all of them are constructed
//! into the registry first, then [`Extension::initialize`] runs once over
//! each with read access to the whole set. Cross-extension references are
//! resolved during `initialize`, never during construction, which keeps
//! mutually dependent extensions constructible in any order.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::SessionConfig;
use crate::correlate::IqRouter;
use crate::disco::ServiceDiscovery;
use crate::pep::Pep;
use crate::ping::Ping;
use crate::pipeline::StanzaFilter;

/// Static description of one loaded extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionDescriptor {
    /// Short name, also used as the filter name in logs.
    pub name: &'static str,
    /// Namespaces this extension advertises in disco#info.
    pub namespaces: &'static [&'static str],
    /// The tag checked on remote entities before talking to them.
    pub capability: &'static str,
}

/// Behaviour shared by every extension.
pub trait Extension: Send + Sync + 'static {
    fn descriptor(&self) -> ExtensionDescriptor;

    /// Second phase of the lifecycle. Runs exactly once, after every
    /// extension for this session has been constructed.
    fn initialize(&self, _registry: &Arc<ExtensionRegistry>) {}
}

/// All extensions loaded for one session, one instance each.
///
/// Accessors are typed per extension; the set is fixed at construction
/// and never changes at runtime.
pub struct ExtensionRegistry {
    disco: Arc<ServiceDiscovery>,
    pep: Arc<Pep>,
    ping: Arc<Ping>,
}

impl ExtensionRegistry {
    /// Construct every extension, then run the initialize pass.
    pub fn build(router: Arc<IqRouter>, config: &SessionConfig) -> Arc<Self> {
        let registry = Arc::new(Self {
            disco: Arc::new(ServiceDiscovery::new(router.clone(), config.clone())),
            pep: Arc::new(Pep::new(router.clone(), config.clone())),
            ping: Arc::new(Ping::new(router, config.clone())),
        });
        for extension in registry.extensions() {
            extension.initialize(&registry);
        }
        registry
    }

    pub fn disco(&self) -> &Arc<ServiceDiscovery> {
        &self.disco
    }

    pub fn pep(&self) -> &Arc<Pep> {
        &self.pep
    }

    pub fn ping(&self) -> &Arc<Ping> {
        &self.ping
    }

    /// Every extension, in load order.
    pub fn extensions(&self) -> Vec<&dyn Extension> {
        vec![
            self.disco.as_ref() as &dyn Extension,
            self.pep.as_ref(),
            self.ping.as_ref(),
        ]
    }

    /// The stanza filters contributed by the extensions, in load order.
    pub fn filters(&self) -> Vec<Arc<dyn StanzaFilter>> {
        vec![
            self.disco.clone() as Arc<dyn StanzaFilter>,
            self.pep.clone(),
            self.ping.clone(),
        ]
    }

    pub fn descriptors(&self) -> Vec<ExtensionDescriptor> {
        self.extensions()
            .into_iter()
            .map(|extension| extension.descriptor())
            .collect()
    }

    /// Union of every loaded extension's namespaces and capability tags.
    ///
    /// Recomputed on demand; this is the feature list the disco responder
    /// answers with.
    pub fn advertised_namespaces(&self) -> BTreeSet<String> {
        let mut namespaces = BTreeSet::new();
        for descriptor in self.descriptors() {
            namespaces.insert(descriptor.capability.to_string());
            for namespace in descriptor.namespaces {
                namespaces.insert((*namespace).to_string());
            }
        }
        namespaces
    }
}
