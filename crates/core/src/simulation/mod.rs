//! Multi-actor network simulation.
//!
//! Every node of a [`TopologyDescription`] becomes an independent actor running
//! on its own thread, with its own unbounded inbox and its own activity log.
//! Actors only exchange messages through a shared [`LinkRegistry`]: a send is
//! enqueued when the link between sender and target is up at the moment of the
//! send, and silently dropped otherwise.
//!
//! # Architecture
//!
//! - **Simulator**: built from a topology; owns the actors and drives them
//!   (start, inject messages, fail links, pause, stop, collect logs).
//! - **NodeActor**: driver-side handle of one node. The thread itself runs a
//!   bounded-wait receive loop, so control requests are observed within one
//!   receive timeout.
//! - **Dispatcher**: routes messages between inboxes, gated by the link
//!   registry, and keeps the delivery counters.
//! - **LinkRegistry**: the set of links currently up. Links can only go down.
//!
//! # Ordering
//!
//! Messages from one sender to one target arrive in send order. Across
//! senders, or across targets, nothing is ordered. A message already sitting
//! in an inbox when its link fails is still handled.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use netreplay::{simulation::Simulator, topology::TopologyDescription, SimulationConfig};
//!
//! let topology = TopologyDescription::new()
//!     .with_node("R1")
//!     .with_node("SW1")
//!     .with_edge("R1", "SW1");
//! let config = SimulationConfig::default().with_recv_timeout(Duration::from_millis(20));
//! let mut sim = Simulator::build_with_config(&topology, config)?;
//! sim.start_all()?;
//! assert!(sim.wait_for_quiescence(Duration::from_secs(5)));
//! sim.stop_all();
//! assert_eq!(sim.log(&"R1".into()).map(|l| l[0].as_str()), Some("R1: started"));
//! # Ok::<(), netreplay::simulation::SimulationError>(())
//! ```

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crossbeam::channel::unbounded;

use crate::{
    config::SimulationConfig,
    message::{Message, NodeId},
    topology::{EdgeAttributes, TopologyDescription},
};

mod actor;
mod dispatch;
mod links;
mod logs;

pub use actor::{ActorState, GreetingHandler, MessageHandler, NodeActor, NodeContext};
pub use dispatch::DeliveryStats;
pub use links::{Link, LinkRegistry};
pub use logs::log_file_name;

use dispatch::Dispatcher;

/// Interval between in-flight checks while waiting for quiescence.
const QUIESCENCE_POLL: Duration = Duration::from_millis(5);

/// The topology cannot be turned into a simulation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("link {from} <-> {to} references unknown node {missing}")]
    UnknownNode {
        from: NodeId,
        to: NodeId,
        missing: NodeId,
    },
    #[error("node {0} is declared more than once")]
    DuplicateNode(NodeId),
    #[error("node {0} has a link to itself")]
    SelfLoop(NodeId),
}

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("node {0} is not part of this simulation")]
    UnknownNode(NodeId),
    #[error("failed to spawn actor thread for {id}: {source}")]
    Spawn {
        id: NodeId,
        #[source]
        source: std::io::Error,
    },
    #[error("log of node {0} is not available until it has stopped")]
    LogsUnavailable(NodeId),
    #[error("failed writing node logs: {0}")]
    Io(#[from] std::io::Error),
}

/// Controller of one simulation run.
///
/// Dropping a simulator stops every actor it still runs.
pub struct Simulator {
    dispatcher: Arc<Dispatcher>,
    actors: BTreeMap<NodeId, NodeActor>,
    config: SimulationConfig,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("nodes", &self.actors.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Simulator {
    /// Builds a simulation with default timing and greeting-replying actors.
    pub fn build(topology: &TopologyDescription) -> Result<Self, ConfigurationError> {
        Self::build_with_config(topology, SimulationConfig::default())
    }

    pub fn build_with_config(
        topology: &TopologyDescription,
        config: SimulationConfig,
    ) -> Result<Self, ConfigurationError> {
        Self::build_with_handlers(topology, config, |_| Box::new(GreetingHandler))
    }

    /// Builds a simulation whose actors react to messages through the handler
    /// `make_handler` returns for each node.
    ///
    /// The whole topology is validated before anything is constructed, so an
    /// error leaves no partial simulation behind. Repeated links between the
    /// same pair collapse into one.
    pub fn build_with_handlers<F>(
        topology: &TopologyDescription,
        config: SimulationConfig,
        mut make_handler: F,
    ) -> Result<Self, ConfigurationError>
    where
        F: FnMut(&NodeId) -> Box<dyn MessageHandler>,
    {
        let mut neighbors: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
        for id in topology.node_ids() {
            if neighbors.insert(id.clone(), BTreeSet::new()).is_some() {
                return Err(ConfigurationError::DuplicateNode(id.clone()));
            }
        }

        let mut links: BTreeMap<Link, EdgeAttributes> = BTreeMap::new();
        for edge in &topology.links {
            for endpoint in [&edge.source, &edge.target] {
                if !neighbors.contains_key(endpoint) {
                    return Err(ConfigurationError::UnknownNode {
                        from: edge.source.clone(),
                        to: edge.target.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
            if edge.source == edge.target {
                return Err(ConfigurationError::SelfLoop(edge.source.clone()));
            }
            links
                .entry(Link::new(edge.source.clone(), edge.target.clone()))
                .or_insert_with(|| edge.attributes.clone());
        }

        for link in links.keys() {
            let (a, b) = link.endpoints();
            if let Some(set) = neighbors.get_mut(a) {
                set.insert(b.clone());
            }
            if let Some(set) = neighbors.get_mut(b) {
                set.insert(a.clone());
            }
        }

        let registry = LinkRegistry::new();
        let link_count = links.len();
        for (link, attributes) in links {
            registry.insert(link, attributes);
        }

        let mut inboxes = BTreeMap::new();
        let mut receivers = BTreeMap::new();
        for id in neighbors.keys() {
            let (tx, rx) = unbounded::<Message>();
            inboxes.insert(id.clone(), tx);
            receivers.insert(id.clone(), rx);
        }
        let dispatcher = Arc::new(Dispatcher::new(registry, inboxes));

        let actors = neighbors
            .into_iter()
            .filter_map(|(id, adjacent)| {
                let inbox = receivers.remove(&id)?;
                let handler = make_handler(&id);
                Some((id.clone(), NodeActor::new(id, adjacent, inbox, handler)))
            })
            .collect::<BTreeMap<_, _>>();

        tracing::info!(nodes = actors.len(), links = link_count, "Simulation built");
        Ok(Self {
            dispatcher,
            actors,
            config,
        })
    }

    /// Starts every actor that has not been started yet. Each started actor
    /// logs `"<id>: started"` and broadcasts a greeting to its up neighbours.
    pub fn start_all(&mut self) -> Result<(), SimulationError> {
        for actor in self.actors.values_mut() {
            actor.start(&self.dispatcher, &self.config)?;
        }
        tracing::debug!(actors = self.actors.len(), "All actors started");
        Ok(())
    }

    /// Injects `message` as if `sender` had broadcast it.
    ///
    /// Returns how many neighbours it reached. An unknown sender has no up
    /// links, so nothing is delivered.
    pub fn deliver_broadcast(&self, sender: &NodeId, message: Message) -> usize {
        self.dispatcher.deliver_broadcast(sender, message)
    }

    /// Injects `message` from `sender` to `target`. Returns `false` when the
    /// message was dropped for lack of an up link.
    pub fn deliver_unicast(&self, sender: &NodeId, target: &NodeId, message: Message) -> bool {
        self.dispatcher.deliver_unicast(sender, target, message)
    }

    /// Takes the link between `a` and `b` down. Unknown or already failed
    /// links are ignored; returns whether this call removed the link.
    pub fn inject_link_failure(&self, a: &NodeId, b: &NodeId) -> bool {
        self.dispatcher.inject_link_failure(a, b)
    }

    pub fn pause(&self, id: &NodeId) -> Result<bool, SimulationError> {
        Ok(self.actor(id)?.pause())
    }

    pub fn resume(&self, id: &NodeId) -> Result<bool, SimulationError> {
        Ok(self.actor(id)?.resume())
    }

    /// Stops one actor and waits for it to hand back its log.
    pub fn stop(&mut self, id: &NodeId) -> Result<bool, SimulationError> {
        let timeout = self.config.join_timeout();
        let actor = self
            .actors
            .get_mut(id)
            .ok_or_else(|| SimulationError::UnknownNode(id.clone()))?;
        actor.stop();
        Ok(actor.join(timeout))
    }

    pub fn state(&self, id: &NodeId) -> Option<ActorState> {
        self.actors.get(id).map(NodeActor::state)
    }

    /// Signals every actor to stop, then waits for each one to exit.
    ///
    /// All joins share one deadline of the configured join timeout, so
    /// shutdown is bounded no matter how many actors are stuck. Returns
    /// `false` if any actor had to be detached.
    pub fn stop_all(&mut self) -> bool {
        for actor in self.actors.values() {
            actor.stop();
        }
        let deadline = Instant::now() + self.config.join_timeout();
        let mut all_exited = true;
        for actor in self.actors.values_mut() {
            all_exited &= actor.join(deadline.saturating_duration_since(Instant::now()));
        }
        tracing::debug!(all_exited, "All actors stopped");
        all_exited
    }

    /// Blocks until no message is queued or being handled and every started
    /// actor has sent its greeting, or until `timeout` elapses.
    pub fn wait_for_quiescence(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        loop {
            if self.dispatcher.in_flight() == 0 {
                return true;
            }
            if started.elapsed() >= timeout {
                tracing::debug!(
                    in_flight = self.dispatcher.in_flight(),
                    ?timeout,
                    "Simulation did not settle"
                );
                return false;
            }
            thread::sleep(QUIESCENCE_POLL);
        }
    }

    /// Logs of all actors that have stopped (or were never started).
    pub fn logs(&self) -> BTreeMap<&NodeId, &[String]> {
        self.actors
            .iter()
            .filter_map(|(id, actor)| actor.log().map(|log| (id, log)))
            .collect()
    }

    pub fn log(&self, id: &NodeId) -> Option<&[String]> {
        self.actors.get(id).and_then(NodeActor::log)
    }

    /// Writes one `<id>.log` file per node into `dir`, creating it if needed.
    ///
    /// Every actor must have stopped first; a running or detached actor yields
    /// [`SimulationError::LogsUnavailable`] and nothing is written.
    pub fn dump_logs(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, SimulationError> {
        let mut records = Vec::with_capacity(self.actors.len());
        for (id, actor) in &self.actors {
            let log = actor
                .log()
                .ok_or_else(|| SimulationError::LogsUnavailable(id.clone()))?;
            records.push((id, log));
        }
        let written = logs::write_logs(dir.as_ref(), records)?;
        tracing::info!(files = written.len(), dir = %dir.as_ref().display(), "Node logs written");
        Ok(written)
    }

    /// Sorted snapshot of the links currently up.
    pub fn links_up(&self) -> Vec<Link> {
        self.dispatcher.links().snapshot()
    }

    pub fn is_link_up(&self, a: &NodeId, b: &NodeId) -> bool {
        self.dispatcher.links().is_up(a, b)
    }

    pub fn link_attributes(&self, a: &NodeId, b: &NodeId) -> Option<EdgeAttributes> {
        self.dispatcher.links().attributes(a, b)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.actors.keys()
    }

    /// Neighbours as built from the topology, regardless of later failures.
    pub fn neighbors(&self, id: &NodeId) -> Option<&BTreeSet<NodeId>> {
        self.actors.get(id).map(NodeActor::neighbors)
    }

    /// Messages waiting in a node's inbox.
    pub fn pending(&self, id: &NodeId) -> Option<usize> {
        self.dispatcher.pending(id)
    }

    pub fn stats(&self) -> DeliveryStats {
        self.dispatcher.stats()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn actor(&self, id: &NodeId) -> Result<&NodeActor, SimulationError> {
        self.actors
            .get(id)
            .ok_or_else(|| SimulationError::UnknownNode(id.clone()))
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        if self
            .actors
            .values()
            .any(|actor| actor.state() != ActorState::Stopped || actor.log().is_none())
        {
            self.stop_all();
        }
    }
}
