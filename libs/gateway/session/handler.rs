//! Collaborator-facing dispatch handling

use muse_transport::Transport;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Receives forwarded dispatch events and connection notifications
pub trait DispatchHandler<L: ?Sized = Transport> {
    fn on_dispatch(&mut self, link: &mut L, event: &str, data: &Value);

    fn on_connect(&mut self, _link: &mut L) {}

    fn on_disconnect(&mut self, _link: &mut L) {}
}

type Route<L> = Box<dyn FnMut(&mut L, &Value)>;

/// Routes dispatch events to closures keyed by event type
pub struct DispatchRouter<L: ?Sized = Transport> {
    routes: HashMap<String, Route<L>>,
}

impl<L: ?Sized> Default for DispatchRouter<L> {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }
}

impl<L: ?Sized> DispatchRouter<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `event`, replacing any previous one
    pub fn on<F>(mut self, event: &str, handler: F) -> Self
    where
        F: FnMut(&mut L, &Value) + 'static,
    {
        self.routes.insert(event.to_string(), Box::new(handler));
        self
    }

    pub fn handles(&self, event: &str) -> bool {
        self.routes.contains_key(event)
    }

    /// Returns false when no handler is registered for `event`
    pub fn route(&mut self, link: &mut L, event: &str, data: &Value) -> bool {
        match self.routes.get_mut(event) {
            Some(handler) => {
                handler(link, data);
                true
            }
            None => false,
        }
    }
}

impl<L: ?Sized> DispatchHandler<L> for DispatchRouter<L> {
    fn on_dispatch(&mut self, link: &mut L, event: &str, data: &Value) {
        if !self.route(link, event, data) {
            debug!("Unhandled dispatch event: {}", event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_routes_by_event_type() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let ready = seen.clone();
        let created = seen.clone();

        let mut router = DispatchRouter::<()>::new()
            .on("READY", move |_, data| {
                ready.borrow_mut().push(format!("ready:{}", data["session_id"]))
            })
            .on("MESSAGE_CREATE", move |_, data| {
                created.borrow_mut().push(format!("message:{}", data["content"]))
            });

        router.on_dispatch(&mut (), "READY", &json!({"session_id": "abc"}));
        router.on_dispatch(&mut (), "MESSAGE_CREATE", &json!({"content": "hi"}));
        router.on_dispatch(&mut (), "TYPING_START", &json!({}));

        assert_eq!(
            *seen.borrow(),
            vec![
                "ready:\"abc\"".to_string(),
                "message:\"hi\"".to_string()
            ]
        );
    }

    #[test]
    fn test_route_reports_unknown_events() {
        let mut router = DispatchRouter::<()>::new().on("READY", |_, _| {});
        assert!(router.handles("READY"));
        assert!(!router.route(&mut (), "GUILD_CREATE", &Value::Null));
    }
}
