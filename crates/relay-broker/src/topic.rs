//! One live broadcast channel: a broker plus the set of attached clients.
use crate::broker::Broker;
use crate::{ClientId, TopicId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A topic exists exactly while at least one subscriber is attached. The
/// registry creates it on the first attach and destroys it on the detach
/// that empties `clients`; destruction cancels `lifetime`, which stops the
/// dispatch task and closes every outbox.
pub struct Topic {
    id: TopicId,
    broker: Broker,
    lifetime: CancellationToken,
    // Authoritative population for liveness and teardown. The broker's
    // subscriber map is authoritative for dispatch; the registry keeps the
    // two in lock-step by routing every attach and detach through both.
    clients: RwLock<HashSet<ClientId>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl Topic {
    pub(crate) fn new(id: TopicId, outbox_capacity: usize) -> Arc<Self> {
        let lifetime = CancellationToken::new();
        let (broker, task) = Broker::start(id.clone(), outbox_capacity, lifetime.clone());
        Arc::new(Self {
            id,
            broker,
            lifetime,
            clients: RwLock::new(HashSet::new()),
            dispatch: Mutex::new(Some(task)),
        })
    }

    pub fn id(&self) -> &TopicId {
        &self.id
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().expect("topic clients lock poisoned").len()
    }

    // Mutations run under the registry's write lock so the emptiness check
    // in `TopicRegistry::detach` is atomic with respect to concurrent
    // attaches. The inner lock only covers O(1) set operations and is never
    // held across I/O.
    pub(crate) fn add_client(&self, client: ClientId) {
        self.clients
            .write()
            .expect("topic clients lock poisoned")
            .insert(client);
    }

    pub(crate) fn remove_client(&self, client: &ClientId) -> bool {
        let mut clients = self.clients.write().expect("topic clients lock poisoned");
        clients.remove(client);
        clients.is_empty()
    }

    pub(crate) fn cancel(&self) {
        self.lifetime.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.lifetime.is_cancelled()
    }

    pub(crate) fn take_dispatch(&self) -> Option<JoinHandle<()>> {
        self.dispatch
            .lock()
            .expect("topic dispatch lock poisoned")
            .take()
    }
}
