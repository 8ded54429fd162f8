//! Sequential processor: walks a component tree and drives the lifecycle of
//! every node it meets.
//!
//! - Actors run one at a time: `before_process`, `act`, then a pacing pause.
//! - Containers receive `before_process` on entry and `on_completion` on exit.
//! - Nested processors run to completion before the parent moves on.
//! - When an actor fails without `continue_on_error`, every container still
//!   open receives exactly one `on_fault`, innermost first, and the run ends.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn};

use crate::component::{
    ActorNode, Component, ComponentId, ComponentMeta, ComponentPath, EntityNode, Fault, FaultCause, ProcessorNode, TraversalCursor,
    TraversalStep,
};
use crate::context::RunContext;

pub mod pacing;

pub use pacing::{Pacer, PauseOutcome, RunControl, SleepPacer};

/// Observable state of a processor. One run per `process` call.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorState {
    #[default]
    Idle,
    Running,
    Completed,
    Faulted,
}

/// Container hook that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    BeforeProcess,
    Completion,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::BeforeProcess => f.write_str("before_process"),
            LifecyclePhase::Completion => f.write_str("on_completion"),
        }
    }
}

/// Reasons a processor run ends in [`ProcessorState::Faulted`].
#[derive(Debug, Error)]
pub enum ProcessError {
    /// An actor failed and `continue_on_error` was not set.
    #[error("actor '{name}' ({component}) failed")]
    ActorFault {
        component: ComponentId,
        name: String,
        #[source]
        source: anyhow::Error,
    },
    /// A container hook failed.
    #[error("entity '{name}' ({component}) failed in {phase}")]
    EntityFault {
        component: ComponentId,
        name: String,
        phase: LifecyclePhase,
        #[source]
        source: anyhow::Error,
    },
    #[error("run cancelled")]
    Cancelled,
    /// The tree changed shape while it was being walked.
    #[error("traversal lost track of the component at {path}")]
    UnbalancedTraversal { path: String },
}

struct Failure {
    fault: Fault,
    error: ProcessError,
}

impl Failure {
    fn actor(meta: &ComponentMeta, source: anyhow::Error) -> Self {
        Self {
            fault: Fault {
                component: meta.id.clone(),
                name: meta.name.clone(),
                cause: FaultCause::ActorFailed {
                    message: format!("{source:#}"),
                },
            },
            error: ProcessError::ActorFault {
                component: meta.id.clone(),
                name: meta.name.clone(),
                source,
            },
        }
    }

    fn entity(meta: &ComponentMeta, phase: LifecyclePhase, source: anyhow::Error) -> Self {
        Self {
            fault: Fault {
                component: meta.id.clone(),
                name: meta.name.clone(),
                cause: FaultCause::EntityFailed {
                    message: format!("{source:#}"),
                },
            },
            error: ProcessError::EntityFault {
                component: meta.id.clone(),
                name: meta.name.clone(),
                phase,
                source,
            },
        }
    }

    fn cancelled(meta: &ComponentMeta) -> Self {
        Self {
            fault: Fault {
                component: meta.id.clone(),
                name: meta.name.clone(),
                cause: FaultCause::Cancelled,
            },
            error: ProcessError::Cancelled,
        }
    }

    fn unbalanced(path: &[usize]) -> Self {
        let path = format!("{path:?}");
        Self {
            fault: Fault {
                component: ComponentId::new(path.clone()),
                name: String::new(),
                cause: FaultCause::EntityFailed {
                    message: "traversal became unbalanced".to_string(),
                },
            },
            error: ProcessError::UnbalancedTraversal { path },
        }
    }
}

/// Runs a tree one component at a time on the calling thread.
#[derive(Debug)]
pub struct SequentialProcessor {
    name: String,
    processing_delay: Duration,
    state: watch::Sender<ProcessorState>,
}

impl SequentialProcessor {
    pub fn new(name: impl Into<String>, processing_delay: Duration) -> Self {
        let (state, _) = watch::channel(ProcessorState::Idle);
        Self {
            name: name.into(),
            processing_delay,
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pause inserted after every actor.
    pub fn processing_delay(&self) -> Duration {
        self.processing_delay
    }

    pub fn state(&self) -> ProcessorState {
        *self.state.borrow()
    }

    /// Receives every state change, including the final one of each run.
    pub fn subscribe(&self) -> watch::Receiver<ProcessorState> {
        self.state.subscribe()
    }

    pub fn is_processing(&self) -> bool {
        self.state() == ProcessorState::Running
    }

    /// True whenever no run is in flight.
    pub fn can_reset_hierarchy(&self) -> bool {
        !self.is_processing()
    }

    pub fn reset(&self) {
        self.state.send_replace(ProcessorState::Idle);
    }

    /// Walks the descendants of `root` in document order.
    ///
    /// `root` itself receives no lifecycle calls; it is the scope of the run.
    /// The open-container stack is local to this call and always ends empty.
    pub fn process(&self, root: &mut EntityNode, context: &mut RunContext) -> Result<(), ProcessError> {
        self.start(root);
        let result = self.traverse(root, context).map_err(|failure| failure.error);
        self.finish(result)
    }

    /// Like [`process`](Self::process), but `root` takes part in its own run:
    /// `before_process` comes first, then `on_completion` after a clean walk or
    /// `on_fault` once every descendant container has been drained.
    pub fn process_with_hooks(&self, root: &mut EntityNode, context: &mut RunContext) -> Result<(), ProcessError> {
        self.start(root);
        let walked = match root.behavior_mut().before_process(context) {
            Ok(()) => self.traverse(root, context),
            Err(source) => Err(Failure::entity(&root.meta, LifecyclePhase::BeforeProcess, source)),
        };
        let result = match walked {
            Ok(()) => root
                .behavior_mut()
                .on_completion(context)
                .map_err(|source| Failure::entity(&root.meta, LifecyclePhase::Completion, source).error),
            Err(failure) => {
                notify_fault(root, context, &failure.fault);
                Err(failure.error)
            }
        };
        self.finish(result)
    }

    fn start(&self, root: &EntityNode) {
        self.state.send_replace(ProcessorState::Running);
        info!(processor = %self.name, root = %root.meta.id, "processing started");
    }

    /// Walks the descendants, draining every open container on failure.
    fn traverse(&self, root: &mut EntityNode, context: &mut RunContext) -> Result<(), Failure> {
        let mut open: Vec<ComponentPath> = Vec::new();
        match self.walk(root, context, &mut open) {
            Ok(()) => Ok(()),
            Err(failure) => {
                drain_open_containers(root, context, &mut open, &failure.fault);
                Err(failure)
            }
        }
    }

    fn finish(&self, result: Result<(), ProcessError>) -> Result<(), ProcessError> {
        match &result {
            Ok(()) => {
                self.state.send_replace(ProcessorState::Completed);
                info!(processor = %self.name, "processing completed");
            }
            Err(error) => {
                self.state.send_replace(ProcessorState::Faulted);
                error!(processor = %self.name, error = %error, "processing faulted");
            }
        }
        result
    }

    fn walk(&self, root: &mut EntityNode, context: &mut RunContext, open: &mut Vec<ComponentPath>) -> Result<(), Failure> {
        let mut cursor = TraversalCursor::new();
        while let Some(step) = cursor.advance(root) {
            match step {
                TraversalStep::Enter(path) => {
                    let entity = root.entity_at_mut(&path).ok_or_else(|| Failure::unbalanced(&path))?;
                    if !entity.meta.enabled {
                        debug!(entity = %entity.meta.id, "skipping disabled entity");
                        cursor.skip_children();
                        continue;
                    }
                    debug!(entity = %entity.meta.id, name = %entity.meta.name, "entering entity");
                    open.push(path);
                    if let Err(source) = entity.behavior_mut().before_process(context) {
                        return Err(Failure::entity(&entity.meta, LifecyclePhase::BeforeProcess, source));
                    }
                }
                TraversalStep::Exit(path) => {
                    let entity = root.entity_at_mut(&path).ok_or_else(|| Failure::unbalanced(&path))?;
                    if !entity.meta.enabled {
                        continue;
                    }
                    if open.last() != Some(&path) {
                        return Err(Failure::unbalanced(&path));
                    }
                    open.pop();
                    debug!(entity = %entity.meta.id, "completing entity");
                    if let Err(source) = entity.behavior_mut().on_completion(context) {
                        return Err(Failure::entity(&entity.meta, LifecyclePhase::Completion, source));
                    }
                }
                TraversalStep::Visit(path) => {
                    let component = root.component_at_mut(&path).ok_or_else(|| Failure::unbalanced(&path))?;
                    if !component.is_enabled() {
                        debug!(component = %component.id(), "skipping disabled component");
                        continue;
                    }
                    if context.control.is_cancelled() {
                        return Err(Failure::cancelled(component.meta()));
                    }
                    match component {
                        Component::Actor(actor) => self.execute_actor(actor, context)?,
                        Component::Processor(nested) => await_nested(nested, context)?,
                        Component::Entity(_) => return Err(Failure::unbalanced(&path)),
                    }
                }
            }
        }

        match open.last() {
            Some(path) => Err(Failure::unbalanced(path)),
            None => Ok(()),
        }
    }

    fn execute_actor(&self, actor: &mut ActorNode, context: &mut RunContext) -> Result<(), Failure> {
        let span = info_span!("actor", component = %actor.meta.id, name = %actor.meta.name);
        let _entered = span.enter();

        match run_actor(actor, context) {
            Ok(()) => debug!("actor completed"),
            Err(error) if actor.continue_on_error => {
                warn!(error = %format!("{error:#}"), "actor failed; continuing because continue_on_error is set");
            }
            Err(error) => {
                actor.mark_faulted();
                error!(error = %format!("{error:#}"), "actor failed");
                return Err(Failure::actor(&actor.meta, error));
            }
        }

        let pause = context.pacer.pause(self.processing_delay, &context.control);
        actor.set_executing(false);
        if pause == PauseOutcome::Cancelled {
            info!("run cancelled during pacing pause");
            return Err(Failure::cancelled(&actor.meta));
        }
        Ok(())
    }
}

fn run_actor(actor: &mut ActorNode, context: &mut RunContext) -> anyhow::Result<()> {
    actor.actor_mut().before_process(context)?;
    actor.set_executing(true);
    actor.actor_mut().act(context)
}

/// A nested processor's fault stays inside it; only cancellation travels up.
fn await_nested(nested: &mut ProcessorNode, context: &mut RunContext) -> Result<(), Failure> {
    match nested.begin_process(context) {
        Ok(()) => Ok(()),
        Err(ProcessError::Cancelled) => Err(Failure::cancelled(&nested.entity.meta)),
        Err(error) => {
            warn!(processor = %nested.entity.meta.id, error = %error, "nested processor faulted; continuing");
            Ok(())
        }
    }
}

fn drain_open_containers(root: &mut EntityNode, context: &mut RunContext, open: &mut Vec<ComponentPath>, fault: &Fault) {
    while let Some(path) = open.pop() {
        let Some(entity) = root.entity_at_mut(&path) else {
            warn!(path = ?path, "open container disappeared before fault notification");
            continue;
        };
        notify_fault(entity, context, fault);
    }
}

/// Errors from `on_fault` are logged and swallowed.
fn notify_fault(entity: &mut EntityNode, context: &mut RunContext, fault: &Fault) {
    debug!(entity = %entity.meta.id, faulted = %fault.component, "notifying entity of fault");
    if let Err(error) = entity.behavior_mut().on_fault(context, fault) {
        error!(
            entity = %entity.meta.id,
            faulted = %fault.component,
            error = %format!("{error:#}"),
            "on_fault failed; continuing to drain"
        );
    }
}
