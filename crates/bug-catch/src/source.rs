// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host event sources for uncaught errors and unhandled rejections.
//!
//! The agent never looks events up globally. It subscribes to whatever
//! [`EventSource`] it was built with, once, at construction. [`EventTarget`] is
//! the in-process implementation; [`capture_panics`] feeds Rust panics into one
//! as `error` events.

use serde::{Deserialize, Serialize};
use std::backtrace::Backtrace;
use std::panic::Location;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// The two notifications the agent listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Error,
    UnhandledRejection,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Error => "error",
            EventKind::UnhandledRejection => "unhandledrejection",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error-like value attached to an event, either the thrown error or the
/// rejection reason. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorObject {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            message: Some(message.into()),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// Raw notification as delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncaughtEvent {
    pub kind: EventKind,
    pub message: Option<String>,
    pub filename: Option<String>,
    pub lineno: Option<u32>,
    pub colno: Option<u32>,
    /// Present on uncaught exceptions
    pub error: Option<ErrorObject>,
    /// Present on unhandled rejections
    pub reason: Option<ErrorObject>,
}

impl UncaughtEvent {
    pub fn error(
        message: impl Into<String>,
        filename: impl Into<String>,
        lineno: u32,
        colno: u32,
        error: ErrorObject,
    ) -> Self {
        Self {
            kind: EventKind::Error,
            message: Some(message.into()),
            filename: Some(filename.into()),
            lineno: Some(lineno),
            colno: Some(colno),
            error: Some(error),
            reason: None,
        }
    }

    pub fn rejection(reason: ErrorObject) -> Self {
        Self {
            kind: EventKind::UnhandledRejection,
            message: None,
            filename: None,
            lineno: None,
            colno: None,
            error: None,
            reason: Some(reason),
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&UncaughtEvent) + Send + Sync>;

/// Something the agent can subscribe to for uncaught events.
pub trait EventSource: Send + Sync {
    fn add_listener(&self, kind: EventKind, handler: EventHandler);
}

/// In-process event dispatcher.
#[derive(Default)]
pub struct EventTarget {
    listeners: Mutex<Vec<(EventKind, EventHandler)>>,
}

impl EventTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls every handler registered for the event's kind, in registration order.
    pub fn dispatch(&self, event: &UncaughtEvent) {
        // Handlers run outside the lock so they may register further listeners.
        let handlers: Vec<EventHandler> = self
            .lock()
            .iter()
            .filter(|(kind, _)| *kind == event.kind)
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        debug!(
            "Bug Catch | Dispatching {} event to {} listener(s)",
            event.kind,
            handlers.len()
        );
        for handler in handlers {
            handler(event);
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock().iter().filter(|(k, _)| *k == kind).count()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(EventKind, EventHandler)>> {
        match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl EventSource for EventTarget {
    fn add_listener(&self, kind: EventKind, handler: EventHandler) {
        self.lock().push((kind, handler));
    }
}

impl std::fmt::Debug for EventTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventTarget({} listeners)", self.lock().len())
    }
}

/// Installs a panic hook that reports every panic to `target` as an uncaught
/// `error` event, then runs the previously installed hook.
pub fn capture_panics(target: Arc<EventTarget>) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };
        target.dispatch(&panic_event(message, info.location()));
        previous(info);
    }));
}

fn panic_event(message: String, location: Option<&Location<'_>>) -> UncaughtEvent {
    let error = ErrorObject {
        name: Some("panic".to_string()),
        message: Some(message.clone()),
        stack: Some(Backtrace::force_capture().to_string()),
    };

    UncaughtEvent {
        kind: EventKind::Error,
        message: Some(message),
        filename: location.map(|l| l.file().to_string()),
        lineno: location.map(Location::line),
        colno: location.map(Location::column),
        error: Some(error),
        reason: None,
    }
}
