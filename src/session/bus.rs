use super::types::{FrameCache, MediaPacket, SubscriberId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::warn;

/// Per-subscriber queue bound (spec §4.5 recommends ~64).
const QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy)]
pub enum CloseReason {
    SessionClosed,
    LaggingOut,
}

enum QueueItem {
    Packet(MediaPacket),
    Closed(CloseReason),
}

struct SubscriberEntry {
    queue: Arc<Mutex<VecDeque<QueueItem>>>,
    notify: Arc<Notify>,
}

struct Inner {
    subscribers: HashMap<SubscriberId, SubscriberEntry>,
    cache: FrameCache,
    closed: bool,
}

/// Single-producer multi-consumer packet bus for one device session. The
/// producer is the codec reader task; consumers are Client Adapter
/// connections. Dispatch under the bus mutex only ever touches in-memory
/// queues — transport I/O happens in the subscriber's own task, outside the
/// lock.
pub struct FanOutBus {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

/// A subscriber's handle to its own bounded queue. Receiving from it never
/// takes the bus lock.
pub struct SubscriberHandle {
    pub id: SubscriberId,
    queue: Arc<Mutex<VecDeque<QueueItem>>>,
    notify: Arc<Notify>,
}

pub enum BusMessage {
    Packet(MediaPacket),
    Closed(CloseReason),
}

impl SubscriberHandle {
    /// Awaits the next packet or terminal close. Returns `None` only if the
    /// handle was abandoned without ever being closed (should not happen in
    /// practice; callers should treat it the same as `Closed`).
    pub async fn recv(&self) -> Option<BusMessage> {
        loop {
            {
                let mut q = self.queue.lock().unwrap();
                if let Some(item) = q.pop_front() {
                    return Some(match item {
                        QueueItem::Packet(p) => BusMessage::Packet(p),
                        QueueItem::Closed(r) => BusMessage::Closed(r),
                    });
                }
            }
            self.notify.notified().await;
        }
    }
}

impl FanOutBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                subscribers: HashMap::new(),
                cache: FrameCache::default(),
                closed: false,
            }),
            next_id: AtomicU64::new(1),
        })
    }

    /// Registers a new subscriber and replays the cached configuration and
    /// keyframe (in that order) ahead of any live packet. Because the replay
    /// items are pushed into the new queue before the subscriber is added to
    /// the dispatch map, and both happen under the same lock, a concurrent
    /// `publish` can never interleave a live packet before the replay.
    pub fn subscribe(&self) -> SubscriberHandle {
        let mut inner = self.inner.lock().unwrap();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut queue = VecDeque::with_capacity(QUEUE_CAPACITY);

        if inner.closed {
            queue.push_back(QueueItem::Closed(CloseReason::SessionClosed));
        } else {
            for packet in inner.cache.replay() {
                queue.push_back(QueueItem::Packet(packet));
            }
        }

        let queue = Arc::new(Mutex::new(queue));
        let notify = Arc::new(Notify::new());

        if !inner.closed {
            inner.subscribers.insert(
                id,
                SubscriberEntry {
                    queue: queue.clone(),
                    notify: notify.clone(),
                },
            );
        }

        SubscriberHandle { id, queue, notify }
    }

    /// Removes a subscriber without signaling it (used when the Client
    /// Adapter itself initiated the disconnect). Returns true if this was
    /// the last subscriber.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.remove(&id);
        inner.subscribers.is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.inner.lock().unwrap().subscribers.contains_key(&id)
    }

    /// Publishes one packet to every current subscriber, applying the
    /// backpressure policy per subscriber: on a full queue, drop the oldest
    /// non-keyframe/configuration packet to make room; if none exists, evict
    /// the subscriber as `LaggingOut`.
    pub fn publish(&self, packet: MediaPacket) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        inner.cache.observe(&packet);

        let mut lagging = Vec::new();
        for (&id, entry) in inner.subscribers.iter() {
            let mut q = entry.queue.lock().unwrap();
            if q.len() >= QUEUE_CAPACITY {
                let droppable = q
                    .iter()
                    .position(|item| matches!(item, QueueItem::Packet(p) if !p.is_protected()));
                match droppable {
                    Some(pos) => {
                        q.remove(pos);
                    }
                    None => {
                        lagging.push(id);
                        continue;
                    }
                }
            }
            q.push_back(QueueItem::Packet(packet.clone()));
            drop(q);
            entry.notify.notify_one();
        }

        for id in lagging {
            if let Some(entry) = inner.subscribers.remove(&id) {
                warn!("subscriber {} lagging, evicting", id);
                entry
                    .queue
                    .lock()
                    .unwrap()
                    .push_back(QueueItem::Closed(CloseReason::LaggingOut));
                entry.notify.notify_one();
            }
        }
    }

    /// Drains and signals every subscriber with `Closed`. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        inner.closed = true;
        for (_, entry) in inner.subscribers.drain() {
            let mut q = entry.queue.lock().unwrap();
            q.clear();
            q.push_back(QueueItem::Closed(CloseReason::SessionClosed));
            drop(q);
            entry.notify.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn data_packet(keyframe: bool) -> MediaPacket {
        MediaPacket::Data {
            pts: 0,
            keyframe,
            payload: Bytes::from_static(b"x"),
        }
    }

    fn config_packet() -> MediaPacket {
        MediaPacket::Configuration {
            payload: Bytes::from_static(b"cfg"),
        }
    }

    #[test]
    fn join_replay_orders_configuration_before_keyframe() {
        let bus = FanOutBus::new();
        bus.publish(config_packet());
        bus.publish(data_packet(true));
        bus.publish(data_packet(false)); // not cached, must not appear in replay

        let sub = bus.subscribe();
        let q = sub.queue.lock().unwrap();
        assert_eq!(q.len(), 2);
        assert!(matches!(q[0], QueueItem::Packet(MediaPacket::Configuration { .. })));
        match &q[1] {
            QueueItem::Packet(MediaPacket::Data { keyframe, .. }) => assert!(*keyframe),
            other => panic!("expected keyframe replay, got {:?}", std::mem::discriminant(other)),
        }
    }

    #[test]
    fn backpressure_drops_oldest_non_protected_packet_first() {
        let bus = FanOutBus::new();
        let sub = bus.subscribe();

        bus.publish(config_packet());
        for _ in 0..(QUEUE_CAPACITY - 1) {
            bus.publish(data_packet(false));
        }
        {
            let q = sub.queue.lock().unwrap();
            assert_eq!(q.len(), QUEUE_CAPACITY);
        }

        bus.publish(data_packet(false));

        let q = sub.queue.lock().unwrap();
        assert_eq!(q.len(), QUEUE_CAPACITY);
        assert!(matches!(q[0], QueueItem::Packet(MediaPacket::Configuration { .. })));
    }

    #[test]
    fn evicts_lagging_subscriber_when_nothing_is_droppable() {
        let bus = FanOutBus::new();
        let sub = bus.subscribe();

        for _ in 0..QUEUE_CAPACITY {
            bus.publish(data_packet(true)); // all protected keyframes, nothing droppable
        }
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(data_packet(true));

        assert_eq!(bus.subscriber_count(), 0);
        let q = sub.queue.lock().unwrap();
        assert!(matches!(q.back(), Some(QueueItem::Closed(CloseReason::LaggingOut))));
    }

    #[test]
    fn close_signals_every_subscriber_and_rejects_new_ones() {
        let bus = FanOutBus::new();
        let sub = bus.subscribe();

        bus.close();

        let q = sub.queue.lock().unwrap();
        assert!(matches!(q.back(), Some(QueueItem::Closed(CloseReason::SessionClosed))));
        drop(q);

        let late = bus.subscribe();
        let q = late.queue.lock().unwrap();
        assert!(matches!(q.front(), Some(QueueItem::Closed(CloseReason::SessionClosed))));
    }
}
