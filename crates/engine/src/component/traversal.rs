//! Document-order traversal of an entity's descendants.
//!
//! A container is reported twice: [`TraversalStep::Enter`] before any of its
//! children and [`TraversalStep::Exit`] after its last descendant. Actors and
//! processors are reported once as [`TraversalStep::Visit`]; a processor's own
//! subtree belongs to that processor and is never walked by its parent.
//!
//! [`TraversalCursor`] does not hold a borrow of the tree between steps, which
//! lets the engine mutate the component it was just handed. The sequence is
//! lazy, finite, and cannot be restarted; adding or removing children while a
//! cursor is live is not supported.

use super::{Component, EntityNode};

/// Index path from a traversal root to a descendant.
pub type ComponentPath = Vec<usize>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalStep {
    /// First occurrence of a container.
    Enter(ComponentPath),
    /// Second occurrence of a container, after all of its descendants.
    Exit(ComponentPath),
    /// The only occurrence of an actor or processor.
    Visit(ComponentPath),
}

impl TraversalStep {
    pub fn path(&self) -> &[usize] {
        match self {
            TraversalStep::Enter(path) | TraversalStep::Exit(path) | TraversalStep::Visit(path) => path,
        }
    }
}

#[derive(Debug)]
struct Frame {
    path: ComponentPath,
    next_child: usize,
}

/// Stepwise traversal state; pass the same root to every [`advance`](Self::advance).
#[derive(Debug)]
pub struct TraversalCursor {
    frames: Vec<Frame>,
}

impl Default for TraversalCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl TraversalCursor {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame {
                path: Vec::new(),
                next_child: 0,
            }],
        }
    }

    /// Produces the next step, or `None` once every descendant has been reported.
    pub fn advance(&mut self, root: &EntityNode) -> Option<TraversalStep> {
        let frame = self.frames.last_mut()?;
        let Some(container) = root.entity_at(&frame.path) else {
            // The tree changed shape under the cursor; stop rather than guess.
            self.frames.clear();
            return None;
        };

        if let Some(child) = container.children().get(frame.next_child) {
            let mut path = frame.path.clone();
            path.push(frame.next_child);
            frame.next_child += 1;
            return Some(match child {
                Component::Entity(_) => {
                    self.frames.push(Frame {
                        path: path.clone(),
                        next_child: 0,
                    });
                    TraversalStep::Enter(path)
                }
                Component::Actor(_) | Component::Processor(_) => TraversalStep::Visit(path),
            });
        }

        let finished = self.frames.pop()?;
        if finished.path.is_empty() {
            return None;
        }
        Some(TraversalStep::Exit(finished.path))
    }

    /// Skips the remaining children of the most recently entered container;
    /// its `Exit` step is still produced.
    pub fn skip_children(&mut self) {
        if let Some(frame) = self.frames.last_mut()
            && !frame.path.is_empty()
        {
            frame.next_child = usize::MAX;
        }
    }
}

/// One reported step together with the component it refers to.
#[derive(Debug, Clone)]
pub struct TraversalItem<'a> {
    pub step: TraversalStep,
    pub component: &'a Component,
}

/// Borrowing iterator over the steps of a [`TraversalCursor`].
pub struct Traversal<'a> {
    root: &'a EntityNode,
    cursor: TraversalCursor,
}

impl<'a> Traversal<'a> {
    pub fn new(root: &'a EntityNode) -> Self {
        Self {
            root,
            cursor: TraversalCursor::new(),
        }
    }
}

impl<'a> Iterator for Traversal<'a> {
    type Item = TraversalItem<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let step = self.cursor.advance(self.root)?;
        let component = self.root.component_at(step.path())?;
        Some(TraversalItem { step, component })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::component::{Actor, ActorNode, ProcessorNode};
    use crate::context::RunContext;

    struct Noop;

    impl Actor for Noop {
        fn act(&mut self, _context: &mut RunContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn describe(root: &EntityNode) -> Vec<String> {
        root.traverse()
            .map(|item| match item.step {
                TraversalStep::Enter(_) => format!("enter:{}", item.component.id()),
                TraversalStep::Exit(_) => format!("exit:{}", item.component.id()),
                TraversalStep::Visit(_) => format!("visit:{}", item.component.id()),
            })
            .collect()
    }

    #[test]
    fn containers_are_reported_on_entry_and_exit() {
        let root = EntityNode::new("root", "Root")
            .with_child(ActorNode::new("a1", "A1", Noop))
            .with_child(
                EntityNode::new("outer", "Outer")
                    .with_child(EntityNode::new("inner", "Inner").with_child(ActorNode::new("a2", "A2", Noop)))
                    .with_child(ActorNode::new("a3", "A3", Noop)),
            )
            .with_child(ProcessorNode::new("proc", "Proc", Duration::ZERO).with_child(ActorNode::new("hidden", "Hidden", Noop)));

        assert_eq!(
            describe(&root),
            vec![
                "visit:a1",
                "enter:outer",
                "enter:inner",
                "visit:a2",
                "exit:inner",
                "visit:a3",
                "exit:outer",
                "visit:proc",
            ]
        );
    }

    #[test]
    fn empty_container_still_enters_and_exits() {
        let root = EntityNode::new("root", "Root").with_child(EntityNode::new("empty", "Empty"));
        assert_eq!(describe(&root), vec!["enter:empty", "exit:empty"]);
    }

    #[test]
    fn disabled_components_keep_their_position() {
        let root = EntityNode::new("root", "Root")
            .with_child(ActorNode::new("a1", "A1", Noop).disabled())
            .with_child(ActorNode::new("a2", "A2", Noop));
        assert_eq!(describe(&root), vec!["visit:a1", "visit:a2"]);
    }

    #[test]
    fn skip_children_jumps_to_exit() {
        let root = EntityNode::new("root", "Root")
            .with_child(EntityNode::new("group", "Group").with_child(ActorNode::new("a1", "A1", Noop)))
            .with_child(ActorNode::new("a2", "A2", Noop));
        let mut cursor = TraversalCursor::new();
        assert_eq!(cursor.advance(&root), Some(TraversalStep::Enter(vec![0])));
        cursor.skip_children();
        assert_eq!(cursor.advance(&root), Some(TraversalStep::Exit(vec![0])));
        assert_eq!(cursor.advance(&root), Some(TraversalStep::Visit(vec![1])));
        assert_eq!(cursor.advance(&root), None);
        assert_eq!(cursor.advance(&root), None, "cursor is not restartable");
    }
}
