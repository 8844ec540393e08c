//! Event-kind to handler mapping.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use livewire_core::{EventKind, InboundEvent};

/// Callback invoked for every dispatched event of its kind.
pub type Handler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// Handlers registered per event kind.
///
/// Handlers run on the supervisor task, in registration order. They should
/// return quickly; anything slow belongs on a task of its own.
#[derive(Clone, Default)]
pub struct EventRegistry {
    handlers: HashMap<EventKind, Vec<Handler>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`.
    pub fn on<F>(mut self, kind: impl Into<EventKind>, handler: F) -> Self
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.register(kind, handler);
        self
    }

    /// Non-builder form of [`EventRegistry::on`].
    pub fn register<F>(&mut self, kind: impl Into<EventKind>, handler: F)
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.handlers
            .entry(kind.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: &EventKind) -> usize {
        self.handlers.get(kind).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run every handler for the event's kind. Returns how many ran.
    pub fn dispatch(&self, event: &InboundEvent) -> usize {
        let Some(handlers) = self.handlers.get(&event.kind) else {
            if event.kind.is_known() {
                tracing::debug!(kind = %event.kind, "no handler registered");
            } else {
                tracing::debug!(kind = %event.kind, "ignoring unrecognized event kind");
            }
            return 0;
        };
        for handler in handlers {
            handler(event);
        }
        handlers.len()
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (kind, handlers) in &self.handlers {
            map.entry(&kind.as_str(), &handlers.len());
        }
        map.finish()
    }
}
