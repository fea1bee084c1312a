//! Concurrent record buffer.
//!
//! A segmented multi-producer queue that holds records between the
//! moment they are logged and the moment the background writer drains
//! them. Producers append without locking: they claim a slot with a
//! fetch-add and publish into it afterwards, so a claimed slot can be
//! momentarily empty. Readers treat such slots as "not yet there".
//!
//! The queue is drained by exactly one consumer. Any thread may open a
//! [`Cursor`] on either end and walk in both directions without
//! consuming; a cursor pins the node it points into, so traversal stays
//! valid while the consumer advances past it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use arc_swap::ArcSwap;

/// Records per node. Producers that overflow a node link a new one.
const NODE_CAPACITY: usize = 128;

/// One fixed-size block of the queue.
struct Node<T> {
    /// Next slot to claim. May overshoot `NODE_CAPACITY` under races.
    enqueue_index: AtomicUsize,
    /// Next slot the consumer will take. Written by the consumer only.
    dequeue_index: AtomicUsize,
    /// Claimed slots publish here after the claim.
    slots: [OnceLock<Arc<T>>; NODE_CAPACITY],
    /// Successor block, linked once by the producer that filled us.
    next: OnceLock<Arc<Node<T>>>,
    /// Predecessor block, weak so consumed blocks can be freed.
    prev: OnceLock<Weak<Node<T>>>,
}

impl<T> Node<T> {
    fn empty() -> Self {
        Self {
            enqueue_index: AtomicUsize::new(0),
            dequeue_index: AtomicUsize::new(0),
            slots: std::array::from_fn(|_| OnceLock::new()),
            next: OnceLock::new(),
            prev: OnceLock::new(),
        }
    }

    /// A node born with its first slot already published. Used when a
    /// producer links a fresh node so its record lands atomically.
    fn with_first(record: Arc<T>) -> Self {
        let node = Self {
            enqueue_index: AtomicUsize::new(1),
            ..Self::empty()
        };
        // The node is private until linked, the slot cannot be taken.
        let _ = node.slots[0].set(record);
        node
    }

    fn claimed(&self) -> usize {
        self.enqueue_index.load(Ordering::SeqCst).min(NODE_CAPACITY)
    }
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Multi-producer, single-consumer queue of shared records.
pub struct RecordBuffer<T> {
    /// Oldest block. Advanced by the consumer.
    head: ArcSwap<Node<T>>,
    /// Newest block hint. May lag behind the true tail.
    tail: ArcSwap<Node<T>>,
}

impl<T> RecordBuffer<T> {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        let node = Arc::new(Node::empty());
        Self {
            head: ArcSwap::new(Arc::clone(&node)),
            tail: ArcSwap::new(node),
        }
    }

    /// Appends a record. Safe to call from any number of threads.
    pub fn offer(&self, record: Arc<T>) {
        loop {
            let mut tail = self.tail.load_full();
            // The hint can lag, walk to the real last block.
            while let Some(next) = tail.next.get() {
                tail = Arc::clone(next);
            }

            let index = tail.enqueue_index.fetch_add(1, Ordering::SeqCst);
            if index < NODE_CAPACITY {
                // Claimed a slot, publish into it. The claim is unique
                // so the cell is necessarily empty.
                let _ = tail.slots[index].set(record);
                return;
            }

            // Block is full. Link a successor carrying the record, or
            // retry against the successor a faster producer linked.
            let node = Arc::new(Node::with_first(Arc::clone(&record)));
            let _ = node.prev.set(Arc::downgrade(&tail));
            if tail.next.set(Arc::clone(&node)).is_ok() {
                self.swing_tail(&tail, node);
                return;
            }
        }
    }

    /// Removes and returns the oldest record.
    ///
    /// The buffer supports exactly one consumer; callers must ensure
    /// `poll` is never invoked from two threads at once. Returns `None`
    /// when the buffer is empty or the oldest slot is claimed but not
    /// yet published.
    pub fn poll(&self) -> Option<Arc<T>> {
        loop {
            let head = self.head.load_full();
            let dequeue = head.dequeue_index.load(Ordering::SeqCst);

            if dequeue >= NODE_CAPACITY {
                let next = head.next.get()?;
                self.head.store(Arc::clone(next));
                continue;
            }

            if dequeue >= head.claimed() {
                return None;
            }

            let record = head.slots[dequeue].get()?;
            let record = Arc::clone(record);
            head.dequeue_index.store(dequeue + 1, Ordering::SeqCst);
            return Some(record);
        }
    }

    /// Opens a cursor on the oldest record without consuming it.
    pub fn peek_first(&self) -> Option<Cursor<T>> {
        let mut node = self.head.load_full();
        loop {
            let dequeue = node.dequeue_index.load(Ordering::SeqCst);
            if dequeue >= NODE_CAPACITY {
                node = Arc::clone(node.next.get()?);
                continue;
            }
            if dequeue >= node.claimed() {
                return None;
            }
            let record = Arc::clone(node.slots[dequeue].get()?);
            return Some(Cursor {
                node,
                slot: dequeue,
                record,
            });
        }
    }

    /// Opens a cursor on the newest published record.
    ///
    /// Slots claimed by producers that have not published yet are
    /// skipped; the cursor lands on the newest record that is actually
    /// visible.
    pub fn peek_last(&self) -> Option<Cursor<T>> {
        let mut node = self.tail.load_full();
        while let Some(next) = node.next.get() {
            node = Arc::clone(next);
        }

        loop {
            let dequeue = node.dequeue_index.load(Ordering::SeqCst);
            let mut slot = node.claimed();
            while slot > dequeue {
                slot -= 1;
                if let Some(record) = node.slots[slot].get() {
                    let record = Arc::clone(record);
                    return Some(Cursor { node, slot, record });
                }
            }
            let prev = node.prev.get()?.upgrade()?;
            node = prev;
        }
    }

    /// Returns `true` when no published record is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peek_first().is_none()
    }

    fn swing_tail(&self, from: &Arc<Node<T>>, to: Arc<Node<T>>) {
        // Best effort: losing the race leaves a stale hint that offer
        // and peek_last correct by walking the next chain.
        let _ = self.tail.compare_and_swap(from, to);
    }
}

impl<T> Default for RecordBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A non-consuming position inside the buffer.
///
/// Holding a cursor keeps its block alive even after the consumer has
/// moved past it, so backward walks started from the tail stay valid.
pub struct Cursor<T> {
    node: Arc<Node<T>>,
    slot: usize,
    record: Arc<T>,
}

impl<T> Cursor<T> {
    /// Returns the record under the cursor.
    #[must_use]
    pub fn record(&self) -> &Arc<T> {
        &self.record
    }

    /// Consumes the cursor, returning its record.
    #[must_use]
    pub fn into_record(self) -> Arc<T> {
        self.record
    }

    /// Moves towards newer records. Returns `None` at the newest
    /// record, or when the next slot is claimed but not yet published.
    #[must_use]
    pub fn next(&self) -> Option<Cursor<T>> {
        let mut node = Arc::clone(&self.node);
        let mut slot = self.slot + 1;
        loop {
            if slot >= NODE_CAPACITY {
                node = Arc::clone(node.next.get()?);
                slot = 0;
                continue;
            }
            if slot >= node.claimed() {
                return None;
            }
            let record = Arc::clone(node.slots[slot].get()?);
            return Some(Cursor { node, slot, record });
        }
    }

    /// Moves towards older records. Returns `None` at the oldest
    /// unconsumed record, or when the previous slot is claimed but not
    /// yet published.
    #[must_use]
    pub fn prev(&self) -> Option<Cursor<T>> {
        let mut node = Arc::clone(&self.node);
        let mut slot = self.slot;
        loop {
            let dequeue = node.dequeue_index.load(Ordering::SeqCst);
            if slot > dequeue {
                slot -= 1;
                let record = Arc::clone(node.slots[slot].get()?);
                return Some(Cursor { node, slot, record });
            }
            let prev = node.prev.get()?.upgrade()?;
            node = prev;
            slot = node.claimed();
        }
    }
}

impl<T> Clone for Cursor<T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            slot: self.slot,
            record: Arc::clone(&self.record),
        }
    }
}
