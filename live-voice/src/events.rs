//! Session events and the listener registry that delivers them.
//!
//! A [`LiveSessionClient`](crate::LiveSessionClient) is the only producer; any number
//! of handlers may subscribe per [`EventKind`]. Handlers run on tokio tasks in
//! registration order and never on an audio device thread.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Call ID to echo back in the response.
    pub id: String,
    /// Function name.
    pub name: String,
    /// Arguments object.
    #[serde(default)]
    pub args: Value,
}

/// The result of a tool invocation, keyed by call ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// The call ID being responded to.
    pub id: String,
    /// The function name.
    pub name: String,
    /// The result of the tool execution.
    pub output: Value,
}

impl ToolResponse {
    /// Create a new tool response.
    pub fn new(id: impl Into<String>, name: impl Into<String>, output: impl Serialize) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            output: serde_json::to_value(output).unwrap_or(Value::Null),
        }
    }

    /// Create a tool response from a string output.
    pub fn from_string(
        id: impl Into<String>,
        name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self { id: id.into(), name: name.into(), output: Value::String(output.into()) }
    }

    /// Respond to `call`.
    pub fn for_call(call: &FunctionCall, output: impl Serialize) -> Self {
        Self::new(call.id.clone(), call.name.clone(), output)
    }
}

/// Everything a session reports to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Transport open and setup frame written.
    Open,
    /// The server acknowledged the setup frame.
    SetupComplete,
    /// The session ended; carries the reason.
    Close(String),
    /// A transport or server error.
    Error(String),
    /// Raw PCM16 reply audio (24 kHz mono).
    Audio(Vec<u8>),
    /// Text reply content.
    Text(String),
    /// The user barged in; buffered playback must be flushed now.
    Interrupted,
    /// The model finished its turn.
    TurnComplete,
    /// The model asks for one or more function calls.
    ToolCall(Vec<FunctionCall>),
    /// The model withdrew earlier calls.
    ToolCallCancellation(Vec<String>),
    /// The server will disconnect soon.
    GoAway {
        /// Time left before the server closes the connection, when announced.
        time_left: Option<Duration>,
    },
}

impl SessionEvent {
    /// The kind handlers subscribe to.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::SetupComplete => EventKind::SetupComplete,
            Self::Close(_) => EventKind::Close,
            Self::Error(_) => EventKind::Error,
            Self::Audio(_) => EventKind::Audio,
            Self::Text(_) => EventKind::Text,
            Self::Interrupted => EventKind::Interrupted,
            Self::TurnComplete => EventKind::TurnComplete,
            Self::ToolCall(_) => EventKind::ToolCall,
            Self::ToolCallCancellation(_) => EventKind::ToolCallCancellation,
            Self::GoAway { .. } => EventKind::GoAway,
        }
    }
}

/// Discriminant of [`SessionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    SetupComplete,
    Close,
    Error,
    Audio,
    Text,
    Interrupted,
    TurnComplete,
    ToolCall,
    ToolCallCancellation,
    GoAway,
}

/// Handle returned by [`EventListeners::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    entries: Vec<(EventKind, ListenerId, Handler)>,
}

/// Per-instance pub/sub registry.
#[derive(Default)]
pub struct EventListeners {
    table: Mutex<ListenerTable>,
}

impl EventListeners {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to events of `kind`.
    pub fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let mut table = self.table.lock();
        let id = ListenerId(table.next_id);
        table.next_id += 1;
        table.entries.push((kind, id, Arc::new(handler)));
        id
    }

    /// Unsubscribe. Returns `false` if `id` was not registered for `kind`.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut table = self.table.lock();
        let before = table.entries.len();
        table.entries.retain(|(k, i, _)| !(*k == kind && *i == id));
        table.entries.len() != before
    }

    /// Number of handlers for `kind`.
    pub fn count(&self, kind: EventKind) -> usize {
        self.table.lock().entries.iter().filter(|(k, _, _)| *k == kind).count()
    }

    /// Deliver `event` to its handlers in registration order.
    ///
    /// Handlers are snapshotted first, so a handler may call `on`/`off` freely.
    pub fn emit(&self, event: &SessionEvent) {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .table
            .lock()
            .entries
            .iter()
            .filter(|(k, _, _)| *k == kind)
            .map(|(_, _, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }
}

impl std::fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListeners").field("handlers", &self.table.lock().entries.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handlers_run_in_registration_order() {
        let listeners = EventListeners::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let log = log.clone();
            listeners.on(EventKind::TurnComplete, move |_| log.lock().push(tag));
        }
        listeners.emit(&SessionEvent::TurnComplete);
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_off_removes_only_that_handler() {
        let listeners = EventListeners::new();
        let hits = Arc::new(Mutex::new(0));
        let h1 = hits.clone();
        let id = listeners.on(EventKind::Interrupted, move |_| *h1.lock() += 1);
        let h2 = hits.clone();
        listeners.on(EventKind::Interrupted, move |_| *h2.lock() += 10);

        assert!(!listeners.off(EventKind::Audio, id));
        assert!(listeners.off(EventKind::Interrupted, id));
        assert!(!listeners.off(EventKind::Interrupted, id));

        listeners.emit(&SessionEvent::Interrupted);
        assert_eq!(*hits.lock(), 10);
    }

    #[test]
    fn test_emit_filters_by_kind() {
        let listeners = EventListeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        listeners.on(EventKind::Audio, move |e| s.lock().push(e.clone()));
        listeners.emit(&SessionEvent::TurnComplete);
        listeners.emit(&SessionEvent::Audio(vec![1, 2]));
        assert_eq!(*seen.lock(), vec![SessionEvent::Audio(vec![1, 2])]);
    }

    #[test]
    fn test_handler_may_unsubscribe_during_emit() {
        let listeners = Arc::new(EventListeners::new());
        let inner = listeners.clone();
        let id = Arc::new(Mutex::new(None));
        let id_slot = id.clone();
        let registered = listeners.on(EventKind::Open, move |_| {
            if let Some(id) = *id_slot.lock() {
                inner.off(EventKind::Open, id);
            }
        });
        *id.lock() = Some(registered);
        listeners.emit(&SessionEvent::Open);
        assert_eq!(listeners.count(EventKind::Open), 0);
    }

    #[test]
    fn test_tool_response_constructors() {
        let call = FunctionCall { id: "c1".into(), name: "render_chart".into(), args: json!({}) };
        let response = ToolResponse::for_call(&call, json!({"ok": true}));
        assert_eq!(response.id, "c1");
        assert_eq!(response.name, "render_chart");
        assert_eq!(response.output["ok"], true);

        let text = ToolResponse::from_string("c2", "lookup", "done");
        assert_eq!(text.output, Value::String("done".into()));
    }
}
