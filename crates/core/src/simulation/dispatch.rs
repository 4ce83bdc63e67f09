//! Delivery of messages between node inboxes, gated by the link registry.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

use crossbeam::channel::Sender;
use parking_lot::RwLock;

use super::links::LinkRegistry;
use crate::message::{Message, NodeId};

/// Counters describing what happened to every send attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Send attempts. Broadcasts count one per neighbour built from the
    /// topology, whether or not the link is still up.
    pub sent: u64,
    /// Messages placed in a target inbox.
    pub delivered: u64,
    /// Sends dropped because the pair had no up link at send time.
    pub dropped_no_link: u64,
    /// Sends dropped because the target actor had already exited.
    pub dropped_dead_target: u64,
}

impl DeliveryStats {
    pub fn total_dropped(&self) -> u64 {
        self.dropped_no_link + self.dropped_dead_target
    }
}

#[derive(Debug, Default)]
struct StatCounters {
    sent: AtomicU64,
    delivered: AtomicU64,
    dropped_no_link: AtomicU64,
    dropped_dead_target: AtomicU64,
}

/// Routes messages between actors.
///
/// Shared by reference between the driver and every actor thread. The inbox
/// map is fixed at build time, so only the link registry and the inboxes
/// themselves are mutated concurrently. An inbox is closed once its actor
/// exits; sends hold the read side so closing waits for them to land.
#[derive(Debug)]
pub(crate) struct Dispatcher {
    links: LinkRegistry,
    inboxes: BTreeMap<NodeId, RwLock<Option<Sender<Message>>>>,
    /// Messages enqueued but not yet fully handled, plus greetings not yet
    /// broadcast by actors that were started.
    in_flight: AtomicUsize,
    stats: StatCounters,
}

impl Dispatcher {
    pub fn new(links: LinkRegistry, inboxes: BTreeMap<NodeId, Sender<Message>>) -> Self {
        Self {
            links,
            inboxes: inboxes
                .into_iter()
                .map(|(id, sender)| (id, RwLock::new(Some(sender))))
                .collect(),
            in_flight: AtomicUsize::new(0),
            stats: StatCounters::default(),
        }
    }

    pub fn links(&self) -> &LinkRegistry {
        &self.links
    }

    /// Enqueues a copy of `message` for every node with an up link to `sender`.
    ///
    /// Nodes that were never linked to `sender` are not send attempts. Returns
    /// the number of inboxes the message was placed in.
    pub fn deliver_broadcast(&self, sender: &NodeId, message: Message) -> usize {
        let mut reached = 0;
        for (target, inbox) in &self.inboxes {
            if target == sender || !self.links.was_built(sender, target) {
                continue;
            }
            self.stats.sent.fetch_add(1, Ordering::Relaxed);
            if !self.links.is_up(sender, target) {
                self.stats.dropped_no_link.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if self.enqueue(target, inbox, message.clone()) {
                reached += 1;
            }
        }
        tracing::trace!(%sender, kind = %message.kind(), reached, "Broadcast");
        reached
    }

    /// Enqueues `message` for `target` if the pair is up, otherwise drops it.
    pub fn deliver_unicast(&self, sender: &NodeId, target: &NodeId, message: Message) -> bool {
        self.stats.sent.fetch_add(1, Ordering::Relaxed);
        let Some(inbox) = self.inboxes.get(target) else {
            tracing::trace!(%sender, %target, "Unicast to unknown node dropped");
            self.stats.dropped_no_link.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        if sender == target || !self.links.is_up(sender, target) {
            tracing::trace!(%sender, %target, kind = %message.kind(), "Unicast dropped: no up link");
            self.stats.dropped_no_link.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.enqueue(target, inbox, message)
    }

    fn enqueue(
        &self,
        target: &NodeId,
        inbox: &RwLock<Option<Sender<Message>>>,
        message: Message,
    ) -> bool {
        let inbox = inbox.read();
        let Some(tx) = inbox.as_ref() else {
            self.stats.dropped_dead_target.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(%target, "Send dropped: inbox closed");
            return false;
        };
        // Count before sending so a quiescence check never sees zero while the
        // message sits in the inbox.
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        match tx.send(message) {
            Ok(()) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.stats.dropped_dead_target.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(%target, "Send dropped: target no longer running");
                false
            }
        }
    }

    /// Refuses further sends to `id`. Returns once every send already in
    /// progress has landed, so the receiver can count what is left.
    pub fn close_inbox(&self, id: &NodeId) {
        if let Some(inbox) = self.inboxes.get(id) {
            inbox.write().take();
        }
    }

    pub fn inject_link_failure(&self, a: &NodeId, b: &NodeId) -> bool {
        let removed = self.links.remove(a, b);
        if removed {
            tracing::info!(%a, %b, "Link down");
        } else {
            tracing::debug!(%a, %b, "Link already down or unknown");
        }
        removed
    }

    /// Number of messages waiting in `id`'s inbox.
    pub fn pending(&self, id: &NodeId) -> Option<usize> {
        self.inboxes
            .get(id)
            .map(|inbox| inbox.read().as_ref().map_or(0, Sender::len))
    }

    pub fn expect_greeting(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub fn greeting_sent(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn message_handled(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Discounts messages that will never be handled because their receiver
    /// exited with them still queued.
    pub fn messages_abandoned(&self, count: usize) {
        if count > 0 {
            self.in_flight.fetch_sub(count, Ordering::SeqCst);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            sent: self.stats.sent.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            dropped_no_link: self.stats.dropped_no_link.load(Ordering::Relaxed),
            dropped_dead_target: self.stats.dropped_dead_target.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{simulation::links::Link, topology::EdgeAttributes};
    use crossbeam::channel::{unbounded, Receiver};

    fn id(s: &str) -> NodeId {
        NodeId::new(s)
    }

    /// R1 -- SW1 -- R2
    fn line() -> (Dispatcher, BTreeMap<NodeId, Receiver<Message>>) {
        let links = LinkRegistry::new();
        links.insert(Link::new(id("R1"), id("SW1")), EdgeAttributes::default());
        links.insert(Link::new(id("SW1"), id("R2")), EdgeAttributes::default());
        let mut inboxes = BTreeMap::new();
        let mut receivers = BTreeMap::new();
        for name in ["R1", "R2", "SW1"] {
            let (tx, rx) = unbounded();
            inboxes.insert(id(name), tx);
            receivers.insert(id(name), rx);
        }
        (Dispatcher::new(links, inboxes), receivers)
    }

    #[test]
    fn broadcast_reaches_only_up_neighbours() {
        let (dispatcher, receivers) = line();
        let reached = dispatcher.deliver_broadcast(&id("SW1"), Message::greeting(id("SW1")));
        assert_eq!(reached, 2);
        assert_eq!(receivers[&id("R1")].len(), 1);
        assert_eq!(receivers[&id("R2")].len(), 1);
        assert_eq!(receivers[&id("SW1")].len(), 0);

        let reached = dispatcher.deliver_broadcast(&id("R1"), Message::greeting(id("R1")));
        assert_eq!(reached, 1);
        assert_eq!(receivers[&id("R2")].len(), 1);
        assert_eq!(dispatcher.in_flight(), 3);
    }

    #[test]
    fn unicast_requires_up_link() {
        let (dispatcher, receivers) = line();
        assert!(!dispatcher.deliver_unicast(&id("R1"), &id("R2"), Message::greeting(id("R1"))));
        assert!(!dispatcher.deliver_unicast(&id("R1"), &id("ghost"), Message::greeting(id("R1"))));
        assert!(dispatcher.deliver_unicast(&id("R1"), &id("SW1"), Message::greeting(id("R1"))));
        assert_eq!(receivers[&id("SW1")].len(), 1);
        assert_eq!(receivers[&id("R2")].len(), 0);

        let stats = dispatcher.stats();
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped_no_link, 2);
    }

    #[test]
    fn failure_does_not_retract_queued_messages() {
        let (dispatcher, receivers) = line();
        assert!(dispatcher.deliver_unicast(&id("SW1"), &id("R2"), Message::greeting(id("SW1"))));
        assert!(dispatcher.inject_link_failure(&id("R2"), &id("SW1")));
        assert!(!dispatcher.inject_link_failure(&id("R2"), &id("SW1")));
        assert!(!dispatcher.deliver_unicast(&id("SW1"), &id("R2"), Message::greeting(id("SW1"))));

        let rx = &receivers[&id("R2")];
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.try_recv().unwrap().kind(), &crate::message::MessageKind::Greeting);
    }

    #[test]
    fn send_to_exited_receiver_is_counted_not_raised() {
        let (dispatcher, mut receivers) = line();
        drop(receivers.remove(&id("R2")));
        assert!(!dispatcher.deliver_unicast(&id("SW1"), &id("R2"), Message::greeting(id("SW1"))));
        let stats = dispatcher.stats();
        assert_eq!(stats.dropped_dead_target, 1);
        assert_eq!(stats.total_dropped(), 1);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[test]
    fn broadcast_counts_only_built_links() {
        let (dispatcher, _receivers) = line();
        dispatcher.deliver_broadcast(&id("R1"), Message::greeting(id("R1")));
        let stats = dispatcher.stats();
        assert_eq!(stats.sent, 1, "R2 was never a neighbour of R1");
        assert_eq!(stats.total_dropped(), 0);

        dispatcher.inject_link_failure(&id("R1"), &id("SW1"));
        assert_eq!(dispatcher.deliver_broadcast(&id("R1"), Message::greeting(id("R1"))), 0);
        let stats = dispatcher.stats();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.dropped_no_link, 1);
    }

    #[test]
    fn closed_inbox_refuses_sends_and_keeps_queued_ones() {
        let (dispatcher, receivers) = line();
        assert!(dispatcher.deliver_unicast(&id("SW1"), &id("R2"), Message::greeting(id("SW1"))));
        dispatcher.close_inbox(&id("R2"));
        assert!(!dispatcher.deliver_unicast(&id("SW1"), &id("R2"), Message::greeting(id("SW1"))));

        assert_eq!(receivers[&id("R2")].try_iter().count(), 1);
        assert_eq!(dispatcher.in_flight(), 1);
        assert_eq!(dispatcher.stats().dropped_dead_target, 1);
        assert_eq!(dispatcher.pending(&id("R2")), Some(0));
    }

    #[test]
    fn per_pair_order_is_fifo() {
        let (dispatcher, receivers) = line();
        for i in 0..10 {
            dispatcher.deliver_unicast(
                &id("R1"),
                &id("SW1"),
                Message::custom("SEQ", id("R1"), i.to_string()),
            );
        }
        let payloads: Vec<String> = receivers[&id("SW1")]
            .try_iter()
            .map(|m| m.payload().to_owned())
            .collect();
        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(payloads, expected);
    }
}
