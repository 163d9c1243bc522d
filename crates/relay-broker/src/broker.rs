//! Per-topic single-writer broker.
//!
//! # Purpose
//! Fans one published payload out to every attached subscriber outbox. The
//! subscriber map is owned exclusively by the dispatch task, so the hot path
//! never takes a lock; publishers and attach/detach callers talk to the task
//! through queues.
use crate::{BrokerError, Result, TopicId};
use bytes::Bytes;
use metrics::{counter, histogram};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Bounded FIFO queue of payloads delivered to one subscriber connection.
///
/// Closed exactly once, by the dispatch task: either on detach, on outbox
/// overflow, or when the topic lifetime is cancelled. A closed outbox yields
/// its buffered payloads and then `None`.
pub struct Outbox {
    id: u64,
    rx: mpsc::Receiver<Bytes>,
}

impl Outbox {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next payload in FIFO order, or `None` once the dispatch task has
    /// closed this outbox and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

enum Control {
    Attach {
        id: u64,
        tx: mpsc::Sender<Bytes>,
        ack: oneshot::Sender<()>,
    },
    Detach {
        id: u64,
    },
}

// Single-slot mailbox for inbound events. A publish overwrites any payload
// the dispatch task has not yet consumed; the newest state wins.
#[derive(Default)]
struct NotifierSlot {
    pending: Mutex<Option<Bytes>>,
    ready: Notify,
}

/// Handle to one topic's dispatch task.
pub struct Broker {
    slot: Arc<NotifierSlot>,
    control_tx: mpsc::UnboundedSender<Control>,
    outbox_capacity: usize,
    next_outbox: AtomicU64,
}

impl Broker {
    /// Spawn the dispatch task for `topic_id` and return its handle. The task
    /// runs until `lifetime` is cancelled, then closes every outbox and exits.
    pub(crate) fn start(
        topic_id: TopicId,
        outbox_capacity: usize,
        lifetime: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let slot = Arc::new(NotifierSlot::default());
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(dispatch(topic_id, lifetime, slot.clone(), control_rx));
        (
            Self {
                slot,
                control_tx,
                outbox_capacity,
                next_outbox: AtomicU64::new(0),
            },
            task,
        )
    }

    /// Non-blocking publish. If the previous payload has not been picked up
    /// yet it is overwritten; the publisher is never stalled by a slow topic.
    pub fn notify(&self, payload: Bytes) {
        let overwritten = {
            let mut pending = self.slot.pending.lock().expect("notifier slot poisoned");
            pending.replace(payload).is_some()
        };
        if overwritten {
            counter!("broker_notify_overwritten_total").increment(1);
        }
        self.slot.ready.notify_one();
    }

    /// Open a fresh outbox for one subscriber. Returns only after the
    /// dispatch task has acknowledged the registration, so a payload
    /// published after `attach` resolves is guaranteed to be offered to the
    /// new outbox.
    pub async fn attach(&self) -> Result<Outbox> {
        let id = self.next_outbox.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.outbox_capacity);
        let (ack_tx, ack_rx) = oneshot::channel();
        self.control_tx
            .send(Control::Attach { id, tx, ack: ack_tx })
            .map_err(|_| BrokerError::Stopped)?;
        ack_rx.await.map_err(|_| BrokerError::Stopped)?;
        Ok(Outbox { id, rx })
    }

    /// Ask the dispatch task to drop and close the outbox. Idempotent; a
    /// stopped task means every outbox is already closed.
    pub fn detach(&self, outbox_id: u64) {
        let _ = self.control_tx.send(Control::Detach { id: outbox_id });
    }
}

// The dispatch task. Owns the subscriber map outright: every read and write
// of `clients` happens on this task, which is what makes the fan-out loop
// lock-free.
async fn dispatch(
    topic_id: TopicId,
    lifetime: CancellationToken,
    slot: Arc<NotifierSlot>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
) {
    let mut clients: HashMap<u64, mpsc::Sender<Bytes>> = HashMap::new();
    loop {
        tokio::select! {
            _ = lifetime.cancelled() => {
                tracing::debug!(topic = %topic_id, clients = clients.len(), "dispatch task stopping");
                // Dropping the senders closes every outbox; writer tasks
                // observe the close and unwind their sockets.
                clients.clear();
                return;
            }
            Some(control) = control_rx.recv() => match control {
                Control::Attach { id, tx, ack } => {
                    clients.insert(id, tx);
                    let _ = ack.send(());
                    tracing::debug!(topic = %topic_id, clients = clients.len(), "subscriber attached");
                }
                Control::Detach { id } => {
                    if clients.remove(&id).is_some() {
                        tracing::debug!(topic = %topic_id, clients = clients.len(), "subscriber detached");
                    }
                }
            },
            _ = slot.ready.notified() => {
                let payload = slot.pending.lock().expect("notifier slot poisoned").take();
                // Coalesced wakeups leave an empty slot behind.
                let Some(payload) = payload else { continue };
                fan_out(&topic_id, &mut clients, payload);
            }
        }
    }
}

fn fan_out(topic_id: &TopicId, clients: &mut HashMap<u64, mpsc::Sender<Bytes>>, payload: Bytes) {
    let mut dead = Vec::new();
    for (id, tx) in clients.iter() {
        histogram!("broker_outbox_depth").record((tx.max_capacity() - tx.capacity()) as f64);
        match tx.try_send(payload.clone()) {
            Ok(()) => {
                counter!("broker_dispatched_total").increment(1);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Slow subscriber: close its outbox rather than stall the
                // topic. The writer task sees the close and detaches.
                counter!("broker_outbox_overflow_total").increment(1);
                tracing::warn!(topic = %topic_id, outbox = id, "outbox overflow, closing subscriber");
                dead.push(*id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                dead.push(*id);
            }
        }
    }
    for id in dead {
        clients.remove(&id);
    }
}
