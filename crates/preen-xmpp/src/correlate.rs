//! The IQ request/response correlation engine.
//!
//! Bridges push-based stanza delivery and pull-based request APIs: each
//! outgoing `get`/`set` IQ registers a pending entry keyed by its `id`,
//! and the matching `result`/`error` reply completes it. Completion is
//! either an awaitable one-shot signal ([`IqRouter::request`]) or a
//! caller-supplied callback ([`IqRouter::request_with_callback`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;
use xmpp_parsers::iq::{Iq, IqType};

use minidom::Element;

use crate::error::ClientError;
use crate::stanza::Stanza;

/// Sender half of the wire channel. The connection layer drains the
/// receiver and serializes each stanza onto the stream.
pub type WireSender = mpsc::UnboundedSender<Stanza>;

/// Callback completing an asynchronous request. Runs on the stanza
/// delivery task; must not block.
pub type ResponseCallback = Box<dyn FnOnce(Result<Iq, ClientError>) + Send + 'static>;

enum Completion {
    Signal(oneshot::Sender<Result<Iq, ClientError>>),
    Callback(ResponseCallback),
}

impl Completion {
    fn complete(self, result: Result<Iq, ClientError>) {
        match self {
            // receiver may have timed out and gone away; nothing to do then
            Completion::Signal(sender) => {
                let _ = sender.send(result);
            }
            Completion::Callback(callback) => callback(result),
        }
    }
}

/// Correlation engine and outbound stanza sink.
pub struct IqRouter {
    wire: WireSender,
    pending: Mutex<HashMap<String, Completion>>,
    closed: AtomicBool,
}

impl IqRouter {
    pub fn new(wire: WireSender) -> Self {
        Self {
            wire,
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Completion>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a stanza for the wire without correlation.
    pub fn send(&self, stanza: Stanza) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionClosed);
        }
        self.wire
            .send(stanza)
            .map_err(|_| ClientError::ConnectionClosed)
    }

    /// Send a `get`/`set` IQ and await its reply.
    ///
    /// Generates a fresh id when the caller left it empty. The reply is
    /// returned as-is, `error`-type replies included; use
    /// [`reply_payload`] to translate protocol-level errors. Only a
    /// timeout or a closed connection is an `Err` here.
    ///
    /// Must not be awaited from within a filter on the delivery task: the
    /// reply could never be routed and the call would wait out its
    /// timeout.
    pub async fn request(&self, iq: Iq, timeout: Duration) -> Result<Iq, ClientError> {
        let iq = prepare_request(iq)?;
        let id = iq.id.clone();

        let (sender, receiver) = oneshot::channel();
        self.register(&id, Completion::Signal(sender))?;
        if let Err(error) = self.send(Stanza::Iq(Box::new(iq))) {
            self.take(&id);
            return Err(error);
        }

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            // completion sender dropped without firing
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.take(&id);
                debug!(id = %id, "request timed out");
                Err(ClientError::Timeout)
            }
        }
    }

    /// Send a `get`/`set` IQ and invoke `callback` with the reply later.
    ///
    /// Never blocks the caller. The callback runs on the delivery task
    /// when the reply arrives, or on a timer task if the timeout fires
    /// first; it is invoked exactly once. Returns the request id.
    pub fn request_with_callback(
        self: &Arc<Self>,
        iq: Iq,
        timeout: Duration,
        callback: ResponseCallback,
    ) -> Result<String, ClientError> {
        let iq = prepare_request(iq)?;
        let id = iq.id.clone();

        self.register(&id, Completion::Callback(callback))?;
        if let Err(error) = self.send(Stanza::Iq(Box::new(iq))) {
            if let Some(completion) = self.take(&id) {
                completion.complete(Err(ClientError::ConnectionClosed));
            }
            return Err(error);
        }

        let router = Arc::clone(self);
        let timer_id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(completion) = router.take(&timer_id) {
                debug!(id = %timer_id, "async request timed out");
                completion.complete(Err(ClientError::Timeout));
            }
        });

        Ok(id)
    }

    /// Offer an inbound IQ to the engine.
    ///
    /// Returns `true` when it was a reply that completed a pending
    /// request. Replies with no matching pending request are dropped.
    pub fn route_reply(&self, iq: &Iq) -> bool {
        if !matches!(iq.payload, IqType::Result(_) | IqType::Error(_)) {
            return false;
        }
        match self.take(&iq.id) {
            Some(completion) => {
                completion.complete(Ok(iq.clone()));
                true
            }
            None => {
                debug!(id = %iq.id, "dropping iq reply with no pending request");
                false
            }
        }
    }

    /// Fail every outstanding request with a connection-closed error and
    /// reject all future sends.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<(String, Completion)> = self.table().drain().collect();
        if !drained.is_empty() {
            warn!(count = drained.len(), "failing outstanding requests on shutdown");
        }
        for (_, completion) in drained {
            completion.complete(Err(ClientError::ConnectionClosed));
        }
    }

    /// Number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    fn register(&self, id: &str, completion: Completion) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionClosed);
        }
        let mut table = self.table();
        if table.contains_key(id) {
            return Err(ClientError::DuplicateRequest(id.to_string()));
        }
        table.insert(id.to_string(), completion);
        Ok(())
    }

    fn take(&self, id: &str) -> Option<Completion> {
        self.table().remove(id)
    }
}

/// Validate an outgoing request and fill in a generated id if needed.
fn prepare_request(mut iq: Iq) -> Result<Iq, ClientError> {
    if !matches!(iq.payload, IqType::Get(_) | IqType::Set(_)) {
        return Err(ClientError::InvalidArgument(
            "correlated requests must be iq get or set".to_string(),
        ));
    }
    if iq.id.is_empty() {
        iq.id = Uuid::new_v4().to_string();
    }
    Ok(iq)
}

/// Unwrap a completed reply, translating `error`-type replies into
/// [`ClientError::Remote`].
pub fn reply_payload(iq: Iq) -> Result<Option<Element>, ClientError> {
    match iq.payload {
        IqType::Result(payload) => Ok(payload),
        IqType::Error(error) => Err(ClientError::remote(&error)),
        IqType::Get(_) | IqType::Set(_) => Err(ClientError::Protocol(
            "reply must be of type result or error".to_string(),
        )),
    }
}
