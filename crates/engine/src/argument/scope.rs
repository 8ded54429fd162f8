//! Resolution scopes: the data model DataBound arguments read and write.
//!
//! A scope holds the root properties of a run's "globals" object and may be
//! chained to a parent. Lookups walk outwards; writes always land in the
//! innermost scope, copying an inherited property down first, so a child scope
//! never changes what its parent or its siblings see.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::{Map, Value};

struct ScopeInner {
    name: String,
    globals: RwLock<Map<String, Value>>,
    parent: Option<Scope>,
}

/// Cheaply cloneable handle to a resolution scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    pub fn root(name: impl Into<String>, globals: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                name: name.into(),
                globals: RwLock::new(globals),
                parent: None,
            }),
        }
    }

    /// Creates a scope chained to `self`.
    pub fn child(&self, name: impl Into<String>, globals: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                name: name.into(),
                globals: RwLock::new(globals),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.inner.parent.as_ref()
    }

    /// Number of ancestors above this scope.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent();
        while let Some(scope) = current {
            depth += 1;
            current = scope.parent();
        }
        depth
    }

    /// True when both handles refer to the same scope.
    pub fn same_scope(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns a copy of the root property `property`, searching outwards.
    pub fn lookup(&self, property: &str) -> Option<Value> {
        if let Some(value) = self.read().get(property) {
            return Some(value.clone());
        }
        self.parent()?.lookup(property)
    }

    pub fn contains(&self, property: &str) -> bool {
        self.read().contains_key(property) || self.parent().is_some_and(|parent| parent.contains(property))
    }

    /// Sets a root property on this scope, shadowing any inherited value.
    pub fn assign(&self, property: impl Into<String>, value: Value) {
        self.write().insert(property.into(), value);
    }

    /// Mutates an existing root property in place.
    ///
    /// A property found only in an ancestor is copied into this scope before
    /// `apply` sees it. Returns `None` when no scope in the chain defines it.
    pub fn update<R>(&self, property: &str, apply: impl FnOnce(&mut Value) -> R) -> Option<R> {
        let mut globals = self.write();
        if let Some(value) = globals.get_mut(property) {
            return Some(apply(value));
        }
        let mut inherited = self.parent()?.lookup(property)?;
        let result = apply(&mut inherited);
        globals.insert(property.to_string(), inherited);
        Some(result)
    }

    /// Flattened view of every visible property; inner scopes win.
    pub fn snapshot(&self) -> Map<String, Value> {
        let mut merged = self.parent().map(Scope::snapshot).unwrap_or_default();
        for (key, value) in self.read().iter() {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    fn read(&self) -> RwLockReadGuard<'_, Map<String, Value>> {
        self.inner.globals.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Map<String, Value>> {
        self.inner.globals.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.inner.name)
            .field("depth", &self.depth())
            .finish_non_exhaustive()
    }
}
