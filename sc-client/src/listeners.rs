//! Listener registry shared by the client and each channel.
//!
//! Callbacks are registered against a scope (every event, or one event type)
//! and removed by handle identity. The same callback may be registered more
//! than once; it then runs once per registration.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use sc_models::{Event, EventType};
use tracing::error;

type Callback = dyn Fn(&Event) + Send + Sync;

/// A registered callback. Clones refer to the same callback.
#[derive(Clone)]
pub struct Listener(Arc<Callback>);

impl Listener {
    pub fn new(callback: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    /// Whether both handles point at the same callback.
    pub fn same(&self, other: &Listener) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn call(&self, event: &Event) {
        let outcome = catch_unwind(AssertUnwindSafe(|| (self.0)(event)));
        if outcome.is_err() {
            error!("listener panicked while handling {}", event.kind);
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", Arc::as_ptr(&self.0))
    }
}

/// Which events a listener receives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListenerScope {
    All,
    Type(EventType),
}

impl From<EventType> for ListenerScope {
    fn from(kind: EventType) -> Self {
        Self::Type(kind)
    }
}

impl From<&str> for ListenerScope {
    /// `"all"` means every event; anything else is an event type name.
    fn from(name: &str) -> Self {
        if name == "all" {
            Self::All
        } else {
            Self::Type(EventType::from_str(name))
        }
    }
}

#[derive(Default)]
struct Registry {
    all: Vec<Listener>,
    typed: HashMap<EventType, Vec<Listener>>,
}

impl Registry {
    fn slot(&mut self, scope: &ListenerScope) -> &mut Vec<Listener> {
        match scope {
            ListenerScope::All => &mut self.all,
            ListenerScope::Type(kind) => self.typed.entry(kind.clone()).or_default(),
        }
    }
}

/// Thread-safe listener registry.
#[derive(Default)]
pub struct Listeners {
    inner: Mutex<Registry>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // A listener can't panic while the lock is held, but don't let a
        // poisoned registry take event delivery down with it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a callback and return its handle.
    pub fn on(
        &self,
        scope: impl Into<ListenerScope>,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Listener {
        let listener = Listener::new(callback);
        self.add(scope, &listener);
        listener
    }

    /// Register an existing handle (again).
    pub fn add(&self, scope: impl Into<ListenerScope>, listener: &Listener) {
        self.lock().slot(&scope.into()).push(listener.clone());
    }

    /// Remove every registration of `listener` under `scope`.
    ///
    /// Returns whether anything was removed.
    pub fn off(&self, scope: impl Into<ListenerScope>, listener: &Listener) -> bool {
        let scope = scope.into();
        let mut registry = self.lock();
        let slot = registry.slot(&scope);
        let before = slot.len();
        slot.retain(|l| !l.same(listener));
        let removed = slot.len() != before;
        if let ListenerScope::Type(kind) = &scope {
            if registry.typed.get(kind).is_some_and(Vec::is_empty) {
                registry.typed.remove(kind);
            }
        }
        removed
    }

    /// Listeners for `kind`: every all-events listener first, then the
    /// type-specific ones, each in registration order.
    pub fn snapshot(&self, kind: &EventType) -> Vec<Listener> {
        let registry = self.lock();
        let mut out = registry.all.clone();
        if let Some(typed) = registry.typed.get(kind) {
            out.extend(typed.iter().cloned());
        }
        out
    }

    /// Invoke the matching listeners outside the lock. A panicking listener
    /// is logged and the rest still run.
    pub fn emit(&self, event: &Event) {
        for listener in self.snapshot(&event.kind) {
            listener.call(event);
        }
    }

    pub fn len(&self) -> usize {
        let registry = self.lock();
        registry.all.len() + registry.typed.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        *self.lock() = Registry::default();
    }
}
