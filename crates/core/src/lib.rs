/// Simulation timings and logger setup.
pub mod config;

/// Messages exchanged between simulated nodes and the ids naming them.
pub mod message;

/// Actors, links and the controller driving a simulation run.
pub mod simulation;

/// Node-link topology descriptions used to build a simulation.
pub mod topology;

/// Tracing subscriber initialization.
#[cfg_attr(test, allow(dead_code))]
pub mod tracing;

pub use config::SimulationConfig;
pub use message::{Message, MessageKind, NodeId};
pub use simulation::{ConfigurationError, SimulationError, Simulator};
pub use topology::TopologyDescription;
