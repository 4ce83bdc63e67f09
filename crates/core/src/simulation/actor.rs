//! Node actors: one thread per simulated node.
//!
//! An actor owns its inbox receiver and its log. It announces itself with a
//! greeting broadcast, then loops on a bounded-wait dequeue so that pause and
//! stop requests are observed within one wait interval.
//!
//! A message dequeued just as a stop lands is still handled before the actor
//! exits. Messages left in the inbox at exit, or held back by a pause that
//! ended in a stop, are discarded.

use std::{
    collections::BTreeSet,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};

use super::{dispatch::Dispatcher, SimulationError};
use crate::{
    config::SimulationConfig,
    message::{Message, MessageKind, NodeId},
};

/// Lifecycle position of an actor.
///
/// `Created → Running ⇄ Paused → Stopped`. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorState {
    Created,
    Running,
    Paused,
    Stopped,
}

/// What the receive loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Proceed,
    Idle,
    Exit,
}

/// Control flags shared between the driver and one actor thread.
#[derive(Debug)]
pub(crate) struct ActorControl {
    state: Mutex<ActorState>,
    changed: Condvar,
}

impl ActorControl {
    fn new() -> Self {
        Self {
            state: Mutex::new(ActorState::Created),
            changed: Condvar::new(),
        }
    }

    pub fn state(&self) -> ActorState {
        *self.state.lock()
    }

    fn transition(&self, from: &[ActorState], to: ActorState) -> bool {
        let mut state = self.state.lock();
        if !from.contains(&*state) {
            return false;
        }
        *state = to;
        self.changed.notify_all();
        true
    }

    pub fn pause(&self) -> bool {
        self.transition(&[ActorState::Running], ActorState::Paused)
    }

    pub fn resume(&self) -> bool {
        self.transition(&[ActorState::Paused], ActorState::Running)
    }

    pub fn stop(&self) -> bool {
        self.transition(
            &[ActorState::Created, ActorState::Running, ActorState::Paused],
            ActorState::Stopped,
        )
    }

    /// Decides the next loop step. A paused actor parks here for at most
    /// `pause_poll`, waking early on any state change.
    fn checkpoint(&self, pause_poll: Duration) -> Step {
        let mut state = self.state.lock();
        match *state {
            ActorState::Stopped => Step::Exit,
            ActorState::Paused => {
                self.changed.wait_for(&mut state, pause_poll);
                match *state {
                    ActorState::Stopped => Step::Exit,
                    _ => Step::Idle,
                }
            }
            ActorState::Created | ActorState::Running => Step::Proceed,
        }
    }
}

/// Reaction of a node to the messages it handles.
///
/// The actor records every handled message in its log before calling the
/// handler, so implementations only decide what to send back.
pub trait MessageHandler: Send + 'static {
    fn on_message(&mut self, ctx: &mut NodeContext<'_>, message: &Message);
}

/// Replies to every greeting with a greeting ack; ignores everything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreetingHandler;

impl MessageHandler for GreetingHandler {
    fn on_message(&mut self, ctx: &mut NodeContext<'_>, message: &Message) {
        match message.kind() {
            MessageKind::Greeting => {
                let ack = Message::greeting_ack(ctx.id().clone());
                ctx.unicast(message.sender(), ack);
            }
            MessageKind::GreetingAck => {}
            MessageKind::Custom(kind) => {
                tracing::trace!(%kind, sender = %message.sender(), "No reaction for message kind");
            }
        }
    }
}

/// The view of the simulation a handler gets while processing one message.
pub struct NodeContext<'a> {
    id: &'a NodeId,
    neighbors: &'a BTreeSet<NodeId>,
    log: &'a mut Vec<String>,
    dispatcher: &'a Dispatcher,
}

impl NodeContext<'_> {
    pub fn id(&self) -> &NodeId {
        self.id
    }

    /// Neighbours as built from the topology. Some links may be down.
    pub fn neighbors(&self) -> &BTreeSet<NodeId> {
        self.neighbors
    }

    pub fn unicast(&self, target: &NodeId, message: Message) -> bool {
        self.dispatcher.deliver_unicast(self.id, target, message)
    }

    pub fn broadcast(&self, message: Message) -> usize {
        self.dispatcher.deliver_broadcast(self.id, message)
    }

    /// Appends a line to this node's log.
    pub fn log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }
}

/// State moved onto the actor's thread.
struct ActorLoop {
    id: NodeId,
    neighbors: BTreeSet<NodeId>,
    inbox: Receiver<Message>,
    handler: Box<dyn MessageHandler>,
    control: Arc<ActorControl>,
    dispatcher: Arc<Dispatcher>,
    recv_timeout: Duration,
    pause_poll: Duration,
    log: Vec<String>,
    /// Dequeued while a pause was being requested; handled first on resume.
    held: Option<Message>,
}

impl ActorLoop {
    fn run(mut self) -> Vec<String> {
        self.log.push(format!("{}: started", self.id));
        let reached = self
            .dispatcher
            .deliver_broadcast(&self.id, Message::greeting(self.id.clone()));
        self.dispatcher.greeting_sent();
        tracing::debug!(reached, "Greeting broadcast");

        loop {
            match self.control.checkpoint(self.pause_poll) {
                Step::Exit => break,
                Step::Idle => continue,
                Step::Proceed => {}
            }

            let message = match self.held.take() {
                Some(message) => message,
                None => match self.inbox.recv_timeout(self.recv_timeout) {
                    Ok(message) => message,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
            };

            if self.accept(message) == Step::Exit {
                break;
            }
        }

        self.dispatcher.close_inbox(&self.id);
        let abandoned = self.inbox.try_iter().count() + usize::from(self.held.is_some());
        self.dispatcher.messages_abandoned(abandoned);
        tracing::debug!(abandoned, handled_lines = self.log.len(), "Actor exited");
        self.log
    }

    /// Handles a dequeued message, or holds it back if a pause landed first.
    fn accept(&mut self, message: Message) -> Step {
        let next = match self.control.state() {
            ActorState::Paused => {
                self.held = Some(message);
                return Step::Idle;
            }
            ActorState::Stopped => Step::Exit,
            ActorState::Created | ActorState::Running => Step::Proceed,
        };
        self.handle(message);
        self.dispatcher.message_handled();
        next
    }

    fn handle(&mut self, message: Message) {
        self.log.push(format!("{} received: {}", self.id, message));
        let mut ctx = NodeContext {
            id: &self.id,
            neighbors: &self.neighbors,
            log: &mut self.log,
            dispatcher: self.dispatcher.as_ref(),
        };
        self.handler.on_message(&mut ctx, &message);
    }
}

/// Driver-side handle of one simulated node.
pub struct NodeActor {
    id: NodeId,
    neighbors: BTreeSet<NodeId>,
    control: Arc<ActorControl>,
    /// Taken when the thread is spawned.
    pending_start: Option<(Receiver<Message>, Box<dyn MessageHandler>)>,
    thread: Option<RunningThread>,
    /// Available once the actor has exited and handed its log back.
    log: Option<Vec<String>>,
}

struct RunningThread {
    handle: JoinHandle<()>,
    exited: Receiver<Vec<String>>,
}

impl NodeActor {
    pub(crate) fn new(
        id: NodeId,
        neighbors: BTreeSet<NodeId>,
        inbox: Receiver<Message>,
        handler: Box<dyn MessageHandler>,
    ) -> Self {
        Self {
            id,
            neighbors,
            control: Arc::new(ActorControl::new()),
            pending_start: Some((inbox, handler)),
            thread: None,
            log: None,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn neighbors(&self) -> &BTreeSet<NodeId> {
        &self.neighbors
    }

    pub fn state(&self) -> ActorState {
        self.control.state()
    }

    /// The actor's log, once it has stopped and been joined.
    ///
    /// An actor that was never started has an empty log.
    pub fn log(&self) -> Option<&[String]> {
        match (&self.log, self.state()) {
            (Some(log), _) => Some(log.as_slice()),
            (None, ActorState::Created) => Some(&[]),
            (None, ActorState::Stopped) if self.pending_start.is_some() => Some(&[]),
            _ => None,
        }
    }

    /// Spawns the actor's thread. Has no effect unless the actor is `Created`.
    pub(crate) fn start(
        &mut self,
        dispatcher: &Arc<Dispatcher>,
        config: &SimulationConfig,
    ) -> Result<(), SimulationError> {
        if self.state() != ActorState::Created || self.pending_start.is_none() {
            tracing::debug!(id = %self.id, state = ?self.state(), "Start ignored");
            return Ok(());
        }
        let Some((inbox, handler)) = self.pending_start.take() else {
            return Ok(());
        };

        self.control.transition(&[ActorState::Created], ActorState::Running);
        dispatcher.expect_greeting();

        let (exit_tx, exited) = bounded::<Vec<String>>(1);
        let actor_loop = ActorLoop {
            id: self.id.clone(),
            neighbors: self.neighbors.clone(),
            inbox,
            handler,
            control: self.control.clone(),
            dispatcher: dispatcher.clone(),
            recv_timeout: config.recv_timeout,
            pause_poll: config.pause_poll,
            log: Vec::new(),
            held: None,
        };

        let span = tracing::info_span!("node", id = %self.id);
        let spawned = thread::Builder::new()
            .name(format!("netreplay-node-{}", self.id))
            .spawn(move || run_actor(actor_loop, exit_tx, span));

        match spawned {
            Ok(handle) => {
                self.thread = Some(RunningThread { handle, exited });
                Ok(())
            }
            Err(source) => {
                dispatcher.greeting_sent();
                self.control.stop();
                self.log = Some(Vec::new());
                Err(SimulationError::Spawn {
                    id: self.id.clone(),
                    source,
                })
            }
        }
    }

    pub fn pause(&self) -> bool {
        let paused = self.control.pause();
        tracing::debug!(id = %self.id, paused, "Pause requested");
        paused
    }

    pub fn resume(&self) -> bool {
        let resumed = self.control.resume();
        tracing::debug!(id = %self.id, resumed, "Resume requested");
        resumed
    }

    /// Signals the actor to exit. The loop notices within one bounded wait.
    pub fn stop(&self) -> bool {
        self.control.stop()
    }

    /// Waits up to `timeout` for a stopped actor to hand back its log.
    ///
    /// Returns `false` if the actor did not exit in time; its thread is then
    /// detached and its log is lost.
    pub(crate) fn join(&mut self, timeout: Duration) -> bool {
        let Some(thread) = self.thread.take() else {
            return true;
        };
        match thread.exited.recv_timeout(timeout) {
            Ok(log) => {
                self.log = Some(log);
                if thread.handle.join().is_err() {
                    tracing::warn!(id = %self.id, "Actor thread panicked after exit");
                }
                true
            }
            Err(RecvTimeoutError::Disconnected) => {
                // The sender is dropped without a send only if the loop panicked.
                let _ = thread.handle.join();
                tracing::warn!(id = %self.id, "Actor thread panicked; log lost");
                false
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(id = %self.id, ?timeout, "Actor did not exit in time; detaching");
                false
            }
        }
    }
}

fn run_actor(actor_loop: ActorLoop, exit_tx: Sender<Vec<String>>, span: tracing::Span) {
    let _enter = span.enter();
    let log = actor_loop.run();
    let _ = exit_tx.send(log);
}
