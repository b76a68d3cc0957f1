//! In-Memory Topic
//!
//! Implements the `Topic` port as an in-process pub/sub bus. Every
//! joined handle is one node; publishing runs the validator of every
//! relaying node on the topic, the publisher's own included.

use crate::domain::ports::{Message, MessageValidator, RelayHandle, Topic, TopicError, ValidationResult};
use crate::domain::value_objects::PeerId;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the observer channel returned by [`MemoryTopic::subscribe`].
const OBSERVER_CAPACITY: usize = 256;

/// In-process network hosting any number of named topics.
#[derive(Default)]
pub struct MemoryNetwork {
    topics: DashMap<String, Arc<Bus>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `topic` as `peer`. The first published seqno is 1.
    pub fn join(&self, topic: &str, peer: PeerId) -> MemoryTopic {
        self.join_at(topic, peer, 1)
    }

    /// Join `topic` as `peer` with an explicit first seqno.
    pub fn join_at(&self, topic: &str, peer: PeerId, first_seqno: u64) -> MemoryTopic {
        let bus = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(Bus::new()))
            .clone();

        let id = bus.next_id.fetch_add(1, Ordering::Relaxed);
        let node = Arc::new(Node {
            peer: peer.clone(),
            relaying: AtomicBool::new(false),
            validator: RwLock::new(None),
        });
        bus.nodes.insert(id, node.clone());
        tracing::debug!("{} joined topic {}", peer, topic);

        MemoryTopic {
            name: topic.to_string(),
            id,
            node,
            bus,
            seqno: AtomicU64::new(first_seqno),
            closed: AtomicBool::new(false),
            failures: AtomicUsize::new(0),
        }
    }

    /// Number of nodes currently joined to `topic`.
    pub fn members(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |bus| bus.nodes.len())
    }
}

struct Bus {
    nodes: DashMap<u64, Arc<Node>>,
    next_id: AtomicU64,
    observers: broadcast::Sender<Message>,
}

impl Bus {
    fn new() -> Self {
        let (observers, _) = broadcast::channel(OBSERVER_CAPACITY);
        Self {
            nodes: DashMap::new(),
            next_id: AtomicU64::new(0),
            observers,
        }
    }
}

struct Node {
    peer: PeerId,
    relaying: AtomicBool,
    validator: RwLock<Option<Arc<dyn MessageValidator>>>,
}

/// One node's handle on an in-memory topic.
pub struct MemoryTopic {
    name: String,
    id: u64,
    node: Arc<Node>,
    bus: Arc<Bus>,
    seqno: AtomicU64,
    closed: AtomicBool,
    /// Publishes left to fail on purpose
    failures: AtomicUsize,
}

impl MemoryTopic {
    pub fn peer(&self) -> &PeerId {
        &self.node.peer
    }

    /// Make the next `n` publishes fail with [`TopicError::Publish`].
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Observe every message published on this topic, by any node.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.bus.observers.subscribe()
    }

    pub fn is_relaying(&self) -> bool {
        self.node.relaying.load(Ordering::SeqCst)
    }

    /// Leave the topic. Further publishes return [`TopicError::Closed`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.node.relaying.store(false, Ordering::SeqCst);
            self.bus.nodes.remove(&self.id);
            tracing::debug!("{} left topic {}", self.node.peer, self.name);
        }
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Drop for MemoryTopic {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl Topic for MemoryTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, data: Bytes) -> Result<(), TopicError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TopicError::Closed);
        }
        if self.take_failure() {
            return Err(TopicError::Publish("injected failure".to_string()));
        }

        let seqno = self.seqno.fetch_add(1, Ordering::SeqCst);
        let msg = Message {
            from: self.node.peer.clone(),
            seqno: Bytes::copy_from_slice(&seqno.to_be_bytes()),
            data,
        };

        // Collect first so no shard lock is held while validators run.
        let validators: Vec<(PeerId, Arc<dyn MessageValidator>)> = self
            .bus
            .nodes
            .iter()
            .filter(|node| node.relaying.load(Ordering::SeqCst))
            .filter_map(|node| {
                let validator = node.validator.read().clone()?;
                Some((node.peer.clone(), validator))
            })
            .collect();

        for (peer, validator) in validators {
            let verdict = validator.validate(&msg);
            if verdict != ValidationResult::Accept {
                tracing::trace!("{} {:?} message {} from {}", peer, verdict, seqno, msg.from);
            }
        }

        let _ = self.bus.observers.send(msg);
        Ok(())
    }

    fn relay(&self) -> Result<RelayHandle, TopicError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TopicError::Closed);
        }
        if self.node.relaying.swap(true, Ordering::SeqCst) {
            return Err(TopicError::AlreadyRelaying);
        }

        let node = self.node.clone();
        Ok(RelayHandle::new(move || {
            node.relaying.store(false, Ordering::SeqCst);
        }))
    }

    fn register_validator(&self, validator: Arc<dyn MessageValidator>) -> Result<(), TopicError> {
        let mut slot = self.node.validator.write();
        if slot.is_some() {
            return Err(TopicError::ValidatorRegistered);
        }
        *slot = Some(validator);
        Ok(())
    }

    fn unregister_validator(&self) {
        self.node.validator.write().take();
    }
}

impl std::fmt::Debug for MemoryTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTopic")
            .field("name", &self.name)
            .field("peer", &self.node.peer)
            .field("relaying", &self.is_relaying())
            .finish()
    }
}
