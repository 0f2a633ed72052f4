//! Session configuration.

use std::time::Duration;

use jid::{BareJid, Jid};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Static configuration for one client session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The JID this session is (or will be) bound to.
    pub jid: Jid,
    /// Timeout applied to correlated requests that do not pass their own.
    pub default_timeout: Duration,
}

impl SessionConfig {
    /// Configuration with the default request timeout.
    pub fn new(jid: Jid) -> Self {
        Self {
            jid,
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the default request timeout.
    pub fn with_timeout(mut self, default_timeout: Duration) -> Self {
        self.default_timeout = default_timeout;
        self
    }

    /// Bare JID of the session's own server.
    pub fn server(&self) -> Jid {
        Jid::from(BareJid::from_parts(None, self.jid.domain()))
    }
}
