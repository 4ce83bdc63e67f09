//! The registry of links currently considered up.

use dashmap::{DashMap, DashSet};

use crate::{message::NodeId, topology::EdgeAttributes};

/// An undirected link between two nodes.
///
/// Endpoints are stored in sorted order so that `Link::new(a, b)` and
/// `Link::new(b, a)` are the same value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Link {
    low: NodeId,
    high: NodeId,
}

impl Link {
    pub fn new(a: NodeId, b: NodeId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn endpoints(&self) -> (&NodeId, &NodeId) {
        (&self.low, &self.high)
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <-> {}", self.low, self.high)
    }
}

/// Set of up links shared by every actor and the driver.
///
/// Membership checks and removals are individually atomic; there is no
/// operation spanning more than one link. Links are only ever removed during a
/// run.
#[derive(Debug, Default)]
pub struct LinkRegistry {
    up: DashSet<Link>,
    attributes: DashMap<Link, EdgeAttributes>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `link` up. The first attributes recorded for a link are kept.
    pub(crate) fn insert(&self, link: Link, attributes: EdgeAttributes) {
        self.attributes.entry(link.clone()).or_insert(attributes);
        self.up.insert(link);
    }

    pub fn is_up(&self, a: &NodeId, b: &NodeId) -> bool {
        self.up.contains(&Link::new(a.clone(), b.clone()))
    }

    /// Whether `a` and `b` were linked when the simulation was built, whether
    /// or not the link has failed since.
    pub fn was_built(&self, a: &NodeId, b: &NodeId) -> bool {
        self.attributes.contains_key(&Link::new(a.clone(), b.clone()))
    }

    /// Marks the link between `a` and `b` as down.
    ///
    /// Returns `true` if the link was up before the call.
    pub fn remove(&self, a: &NodeId, b: &NodeId) -> bool {
        self.up.remove(&Link::new(a.clone(), b.clone())).is_some()
    }

    /// Descriptive attributes recorded for the link at build time, whether or
    /// not it is still up.
    pub fn attributes(&self, a: &NodeId, b: &NodeId) -> Option<EdgeAttributes> {
        self.attributes
            .get(&Link::new(a.clone(), b.clone()))
            .map(|entry| entry.value().clone())
    }

    /// Sorted snapshot of the up links.
    pub fn snapshot(&self) -> Vec<Link> {
        let mut links: Vec<Link> = self.up.iter().map(|link| link.key().clone()).collect();
        links.sort();
        links
    }

    pub fn len(&self) -> usize {
        self.up.len()
    }

    pub fn is_empty(&self) -> bool {
        self.up.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeId {
        NodeId::new(s)
    }

    #[test]
    fn link_is_unordered() {
        assert_eq!(Link::new(id("SW1"), id("R1")), Link::new(id("R1"), id("SW1")));
        assert_eq!(Link::new(id("SW1"), id("R1")).to_string(), "R1 <-> SW1");
    }

    #[test]
    fn membership_ignores_direction() {
        let registry = LinkRegistry::new();
        registry.insert(Link::new(id("R1"), id("SW1")), EdgeAttributes::default());
        assert!(registry.is_up(&id("R1"), &id("SW1")));
        assert!(registry.is_up(&id("SW1"), &id("R1")));
        assert!(!registry.is_up(&id("R1"), &id("R2")));
    }

    #[test]
    fn removal_is_idempotent() {
        let registry = LinkRegistry::new();
        registry.insert(Link::new(id("R1"), id("SW1")), EdgeAttributes::default());
        registry.insert(Link::new(id("SW1"), id("R2")), EdgeAttributes::default());

        assert!(registry.remove(&id("SW1"), &id("R1")));
        let once = registry.snapshot();
        assert!(!registry.remove(&id("R1"), &id("SW1")));
        assert!(!registry.remove(&id("R1"), &id("nope")));
        assert_eq!(registry.snapshot(), once);
        assert_eq!(once, vec![Link::new(id("R2"), id("SW1"))]);
    }

    #[test]
    fn attributes_survive_link_failure() {
        let registry = LinkRegistry::new();
        let attrs = EdgeAttributes {
            mtu_a: Some(1500),
            ..Default::default()
        };
        registry.insert(Link::new(id("R1"), id("SW1")), attrs.clone());
        registry.remove(&id("R1"), &id("SW1"));
        assert!(registry.is_empty());
        assert!(registry.was_built(&id("SW1"), &id("R1")));
        assert!(!registry.was_built(&id("R1"), &id("R2")));
        assert_eq!(registry.attributes(&id("SW1"), &id("R1")), Some(attrs));
    }

    #[test]
    fn concurrent_removals_remove_exactly_once() {
        use std::sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        };

        let registry = Arc::new(LinkRegistry::new());
        registry.insert(Link::new(id("A"), id("B")), EdgeAttributes::default());
        let removed = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let removed = removed.clone();
                std::thread::spawn(move || {
                    if registry.remove(&id("B"), &id("A")) {
                        removed.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(removed.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }
}
