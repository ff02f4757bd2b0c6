//! Event emitter: notifies the owning application of state-changing commands.
//!
//! Four kinds of event exist, one per command with a side effect:
//!
//! | Kind                  | Raised by  | Carries                  |
//! |-----------------------|------------|--------------------------|
//! | `SavingPathChanged`   | `SAVE`     | the new path             |
//! | `PositionChanged`     | `SET`      | the list of positions    |
//! | `Get`                 | `GET`      | nothing                  |
//! | `OptChanged`          | `INFO_OPT` | the optics data          |
//!
//! Each kind has a single callback slot.  Registering a handler replaces the
//! previous one; [`Registerable::clear`] empties the slot.
//!
//! # Failure isolation
//!
//! Handlers run synchronously on the dispatch thread.  A handler that returns
//! `Err` or panics is logged and otherwise ignored: the request that raised
//! the event still gets its normal reply and the loop keeps serving.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, error};

/// The kinds of event a server can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SavingPathChanged,
    PositionChanged,
    Get,
    OptChanged,
}

impl EventKind {
    /// Returns the event's name as used in log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SavingPathChanged => "saving_path_changed",
            EventKind::PositionChanged => "position_changed",
            EventKind::Get => "get",
            EventKind::OptChanged => "opt_changed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event together with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SavingPathChanged(String),
    PositionChanged(Vec<Value>),
    Get,
    OptChanged(Value),
}

impl ServerEvent {
    /// Returns the kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::SavingPathChanged(_) => EventKind::SavingPathChanged,
            ServerEvent::PositionChanged(_) => EventKind::PositionChanged,
            ServerEvent::Get => EventKind::Get,
            ServerEvent::OptChanged(_) => EventKind::OptChanged,
        }
    }
}

/// A registered callback.
pub type EventHandler = Arc<dyn Fn(&ServerEvent) -> anyhow::Result<()> + Send + Sync>;

/// Wraps a closure as an [`EventHandler`].
pub fn handler<F>(f: F) -> EventHandler
where
    F: Fn(&ServerEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// What happened when an event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// No handler was registered for the kind.
    NoHandler,
    /// The handler ran and returned `Ok`.
    Delivered,
    /// The handler returned `Err` or panicked; the failure was logged.
    Failed,
}

// ── Capabilities ──────────────────────────────────────────────────────────────

/// The registration side of a callback registry.
pub trait Registerable {
    /// Installs `handler` for `kind`, returning the handler it replaced.
    fn register(&self, kind: EventKind, handler: EventHandler) -> Option<EventHandler>;

    /// Removes the handler for `kind`, returning it.
    fn clear(&self, kind: EventKind) -> Option<EventHandler>;

    /// Returns `true` if a handler is installed for `kind`.
    fn is_registered(&self, kind: EventKind) -> bool;
}

/// The invocation side of a callback registry.
pub trait Invokable {
    /// Delivers `event` to its handler, if any, without propagating failures.
    fn emit(&self, event: &ServerEvent) -> EmitOutcome;
}

// ── Single-slot registry ──────────────────────────────────────────────────────

/// Callback registry holding at most one handler per [`EventKind`].
#[derive(Default)]
pub struct EventEmitter {
    slots: Mutex<HashMap<EventKind, EventHandler>>,
}

impl EventEmitter {
    /// Creates an emitter with every slot empty.
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<EventKind, EventHandler>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&'static str> = self.slots().keys().map(EventKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("EventEmitter").field("registered", &kinds).finish()
    }
}

impl Registerable for EventEmitter {
    fn register(&self, kind: EventKind, handler: EventHandler) -> Option<EventHandler> {
        debug!("callback registered for '{kind}'");
        self.slots().insert(kind, handler)
    }

    fn clear(&self, kind: EventKind) -> Option<EventHandler> {
        self.slots().remove(&kind)
    }

    fn is_registered(&self, kind: EventKind) -> bool {
        self.slots().contains_key(&kind)
    }
}

impl Invokable for EventEmitter {
    fn emit(&self, event: &ServerEvent) -> EmitOutcome {
        let kind = event.kind();
        // Clone the handler out so the lock is not held while user code runs;
        // a handler may itself register or clear callbacks.
        let Some(handler) = self.slots().get(&kind).cloned() else {
            return EmitOutcome::NoHandler;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
            Ok(Ok(())) => EmitOutcome::Delivered,
            Ok(Err(e)) => {
                error!("callback for '{kind}' failed: {e:#}");
                EmitOutcome::Failed
            }
            Err(payload) => {
                error!("callback for '{kind}' panicked: {}", panic_message(&*payload));
                EmitOutcome::Failed
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
