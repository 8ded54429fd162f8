//! Component model: the tree of actors, entities, and processors a run walks.
//!
//! Every node carries a [`ComponentMeta`] (identifier, display name, enabled
//! flag, and a non-owning back-reference to its parent by identifier). The
//! node kinds form a closed set, so the engine dispatches over [`Component`]
//! with a single exhaustive `match` instead of probing for capabilities.
//!
//! - [`ActorNode`]: a leaf performing one concrete action through [`Actor`].
//! - [`EntityNode`]: an ordered container; child order is execution order.
//! - [`ProcessorNode`]: an entity that runs its own subtree with its own
//!   [`SequentialProcessor`](crate::processor::SequentialProcessor).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::processor::{ProcessError, SequentialProcessor};

pub mod traversal;

pub use traversal::{ComponentPath, Traversal, TraversalCursor, TraversalItem, TraversalStep};

/// Stable identifier of a component within a tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ComponentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Data shared by every component kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentMeta {
    pub id: ComponentId,
    pub name: String,
    /// Disabled components keep their place in the tree but are never processed.
    pub enabled: bool,
    parent: Option<ComponentId>,
}

impl ComponentMeta {
    pub fn new(id: impl Into<ComponentId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            parent: None,
        }
    }

    /// Identifier of the owning container, if the component is attached.
    pub fn parent(&self) -> Option<&ComponentId> {
        self.parent.as_ref()
    }

    pub(crate) fn set_parent(&mut self, parent: Option<ComponentId>) {
        self.parent = parent;
    }
}

/// Why open containers are being notified through `on_fault`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultCause {
    /// An actor failed and did not allow the run to continue.
    ActorFailed { message: String },
    /// A container lifecycle hook failed.
    EntityFailed { message: String },
    /// The run was cancelled through its [`RunControl`](crate::processor::RunControl).
    Cancelled,
}

/// Describes the component that brought a traversal down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub component: ComponentId,
    pub name: String,
    pub cause: FaultCause,
}

/// Behaviour of a leaf action.
///
/// `act` runs synchronously on the calling thread; resolve inputs and write
/// outputs through [`RunContext::resolver`].
pub trait Actor: Send {
    fn before_process(&mut self, _context: &mut RunContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn act(&mut self, context: &mut RunContext) -> anyhow::Result<()>;

    /// Clears any state kept between runs.
    fn reset(&mut self) {}
}

/// Lifecycle hooks of a container. Every method defaults to a no-op.
///
/// For each traversal the engine calls `before_process` once on entry and
/// exactly one of `on_completion` / `on_fault` on exit.
pub trait EntityBehavior: Send {
    fn before_process(&mut self, _context: &mut RunContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_completion(&mut self, _context: &mut RunContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_fault(&mut self, _context: &mut RunContext, _fault: &Fault) -> anyhow::Result<()> {
        Ok(())
    }

    fn reset(&mut self) {}
}

struct NoopBehavior;

impl EntityBehavior for NoopBehavior {}

/// Leaf component wrapping an [`Actor`].
pub struct ActorNode {
    pub meta: ComponentMeta,
    /// When true, a failing `act` is logged and the traversal carries on.
    pub continue_on_error: bool,
    is_executing: bool,
    is_faulted: bool,
    actor: Box<dyn Actor>,
}

impl ActorNode {
    pub fn new(id: impl Into<ComponentId>, name: impl Into<String>, actor: impl Actor + 'static) -> Self {
        Self::boxed(ComponentMeta::new(id, name), Box::new(actor))
    }

    pub fn boxed(meta: ComponentMeta, actor: Box<dyn Actor>) -> Self {
        Self {
            meta,
            continue_on_error: false,
            is_executing: false,
            is_faulted: false,
            actor,
        }
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.meta.enabled = false;
        self
    }

    pub fn is_executing(&self) -> bool {
        self.is_executing
    }

    pub fn is_faulted(&self) -> bool {
        self.is_faulted
    }

    pub(crate) fn set_executing(&mut self, executing: bool) {
        self.is_executing = executing;
    }

    pub(crate) fn mark_faulted(&mut self) {
        self.is_executing = false;
        self.is_faulted = true;
    }

    pub(crate) fn actor_mut(&mut self) -> &mut dyn Actor {
        self.actor.as_mut()
    }

    fn reset_hierarchy(&mut self) {
        self.is_executing = false;
        self.is_faulted = false;
        self.actor.reset();
    }
}

impl fmt::Debug for ActorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorNode")
            .field("meta", &self.meta)
            .field("continue_on_error", &self.continue_on_error)
            .field("is_executing", &self.is_executing)
            .field("is_faulted", &self.is_faulted)
            .finish_non_exhaustive()
    }
}

/// Ordered container of owned child components.
pub struct EntityNode {
    pub meta: ComponentMeta,
    children: Vec<Component>,
    behavior: Box<dyn EntityBehavior>,
}

impl EntityNode {
    pub fn new(id: impl Into<ComponentId>, name: impl Into<String>) -> Self {
        Self {
            meta: ComponentMeta::new(id, name),
            children: Vec::new(),
            behavior: Box::new(NoopBehavior),
        }
    }

    pub fn with_behavior(mut self, behavior: impl EntityBehavior + 'static) -> Self {
        self.behavior = Box::new(behavior);
        self
    }

    pub fn with_child(mut self, child: impl Into<Component>) -> Self {
        self.add_child(child);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.meta.enabled = false;
        self
    }

    /// Appends `child`, recording this entity as its parent.
    pub fn add_child(&mut self, child: impl Into<Component>) {
        let mut child = child.into();
        child.meta_mut().set_parent(Some(self.meta.id.clone()));
        self.children.push(child);
    }

    /// Detaches and returns the child with `id`, clearing its parent reference.
    pub fn remove_child(&mut self, id: &ComponentId) -> Option<Component> {
        let position = self.children.iter().position(|child| child.id() == id)?;
        let mut child = self.children.remove(position);
        child.meta_mut().set_parent(None);
        Some(child)
    }

    pub fn children(&self) -> &[Component] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [Component] {
        &mut self.children
    }

    /// Lazily walks the descendants of this entity in document order.
    pub fn traverse(&self) -> Traversal<'_> {
        Traversal::new(self)
    }

    /// Looks up a descendant by index path (empty path is this entity's children root).
    pub fn component_at(&self, path: &[usize]) -> Option<&Component> {
        let (first, rest) = path.split_first()?;
        let mut current = self.children.get(*first)?;
        for index in rest {
            current = current.as_entity()?.children.get(*index)?;
        }
        Some(current)
    }

    pub fn component_at_mut(&mut self, path: &[usize]) -> Option<&mut Component> {
        let (first, rest) = path.split_first()?;
        let mut current = self.children.get_mut(*first)?;
        for index in rest {
            current = current.as_entity_mut()?.children.get_mut(*index)?;
        }
        Some(current)
    }

    /// Resolves `path` to a container; the empty path resolves to `self`.
    pub fn entity_at(&self, path: &[usize]) -> Option<&EntityNode> {
        if path.is_empty() {
            return Some(self);
        }
        self.component_at(path)?.as_entity()
    }

    pub fn entity_at_mut(&mut self, path: &[usize]) -> Option<&mut EntityNode> {
        if path.is_empty() {
            return Some(self);
        }
        self.component_at_mut(path)?.as_entity_mut()
    }

    /// Depth-first search for a descendant with `id`.
    pub fn find(&self, id: &ComponentId) -> Option<&Component> {
        self.traverse()
            .filter(|item| !matches!(item.step, TraversalStep::Exit(_)))
            .map(|item| item.component)
            .find(|component| component.id() == id)
    }

    /// Clears run-scoped state on every enabled direct child entity or processor.
    pub fn reset_child_components(&mut self) {
        for child in self.children.iter_mut().filter(|child| child.is_enabled()) {
            match child {
                Component::Entity(entity) => entity.reset_hierarchy(),
                Component::Processor(processor) => processor.reset_hierarchy(),
                Component::Actor(_) => {}
            }
        }
    }

    /// Clears run-scoped state on this entity and its whole subtree.
    pub fn reset_hierarchy(&mut self) {
        self.behavior.reset();
        for child in &mut self.children {
            child.reset_hierarchy();
        }
    }

    pub(crate) fn behavior_mut(&mut self) -> &mut dyn EntityBehavior {
        self.behavior.as_mut()
    }
}

impl fmt::Debug for EntityNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityNode")
            .field("meta", &self.meta)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

/// Entity that owns and runs its own subtree.
///
/// A parent traversal visits a processor once, as if it were a leaf, and then
/// waits for [`ProcessorNode::begin_process`] to finish before moving on.
#[derive(Debug)]
pub struct ProcessorNode {
    pub entity: EntityNode,
    processor: SequentialProcessor,
}

impl ProcessorNode {
    pub fn new(id: impl Into<ComponentId>, name: impl Into<String>, processing_delay: Duration) -> Self {
        let entity = EntityNode::new(id, name);
        let processor = SequentialProcessor::new(entity.meta.name.clone(), processing_delay);
        Self { entity, processor }
    }

    pub fn with_child(mut self, child: impl Into<Component>) -> Self {
        self.entity.add_child(child);
        self
    }

    pub fn with_behavior(mut self, behavior: impl EntityBehavior + 'static) -> Self {
        self.entity = self.entity.with_behavior(behavior);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.entity.meta.enabled = false;
        self
    }

    pub fn processor(&self) -> &SequentialProcessor {
        &self.processor
    }

    /// Runs the nested subtree to completion.
    ///
    /// The node's own behavior brackets the run: `before_process` first, then
    /// `on_completion` or `on_fault`.
    pub fn begin_process(&mut self, context: &mut RunContext) -> Result<(), ProcessError> {
        self.processor.process_with_hooks(&mut self.entity, context)
    }

    pub fn reset_child_components(&mut self) {
        self.entity.reset_child_components();
    }

    pub fn reset_hierarchy(&mut self) {
        self.entity.reset_hierarchy();
        self.processor.reset();
    }
}

/// Closed set of schedulable units.
#[derive(Debug)]
pub enum Component {
    Actor(ActorNode),
    Entity(EntityNode),
    Processor(ProcessorNode),
}

impl Component {
    pub fn meta(&self) -> &ComponentMeta {
        match self {
            Component::Actor(actor) => &actor.meta,
            Component::Entity(entity) => &entity.meta,
            Component::Processor(processor) => &processor.entity.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ComponentMeta {
        match self {
            Component::Actor(actor) => &mut actor.meta,
            Component::Entity(entity) => &mut entity.meta,
            Component::Processor(processor) => &mut processor.entity.meta,
        }
    }

    pub fn id(&self) -> &ComponentId {
        &self.meta().id
    }

    pub fn name(&self) -> &str {
        &self.meta().name
    }

    pub fn is_enabled(&self) -> bool {
        self.meta().enabled
    }

    /// Returns the container view for plain entities only; processors own
    /// their subtree and are not descended into by a parent traversal.
    pub fn as_entity(&self) -> Option<&EntityNode> {
        match self {
            Component::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_entity_mut(&mut self) -> Option<&mut EntityNode> {
        match self {
            Component::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_actor(&self) -> Option<&ActorNode> {
        match self {
            Component::Actor(actor) => Some(actor),
            _ => None,
        }
    }

    pub fn as_processor(&self) -> Option<&ProcessorNode> {
        match self {
            Component::Processor(processor) => Some(processor),
            _ => None,
        }
    }

    pub fn reset_hierarchy(&mut self) {
        match self {
            Component::Actor(actor) => actor.reset_hierarchy(),
            Component::Entity(entity) => entity.reset_hierarchy(),
            Component::Processor(processor) => processor.reset_hierarchy(),
        }
    }
}

impl From<ActorNode> for Component {
    fn from(value: ActorNode) -> Self {
        Component::Actor(value)
    }
}

impl From<EntityNode> for Component {
    fn from(value: EntityNode) -> Self {
        Component::Entity(value)
    }
}

impl From<ProcessorNode> for Component {
    fn from(value: ProcessorNode) -> Self {
        Component::Processor(value)
    }
}
