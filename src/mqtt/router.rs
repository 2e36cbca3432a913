//! Inbound message routing.
//!
//! One handler per channel, last registration wins. A payload that is not
//! valid JSON is handed through as text, and a failing handler (error or
//! panic) is logged and forgotten so the next message is processed normally.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{debug, error, warn};

use super::topics::{Channel, TopicRegistry};

/// Decoded body of an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    /// Anything that did not parse as JSON, passed through unchanged.
    Text(String),
}

impl Payload {
    pub fn parse(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        match serde_json::from_str(&text) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Text(text.into_owned()),
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Text(_) => None,
        }
    }

    /// The payload as it came off the wire (JSON re-serialised).
    pub fn raw_text(&self) -> String {
        match self {
            Payload::Json(value) => value.to_string(),
            Payload::Text(text) => text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub channel: Channel,
    pub topic: String,
    pub payload: Payload,
    pub received_at: DateTime<Local>,
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let body = self.payload.raw_text();
        let preview: String = body.chars().take(40).collect();
        write!(f, "{} - {}: {}", self.received_at, self.topic, preview)
    }
}

pub type Handler = Arc<dyn Fn(&InboundMessage) -> color_eyre::Result<()> + Send + Sync>;

/// Channel → handler table plus the registry used to resolve wire topics.
#[derive(Clone)]
pub struct MessageRouter {
    topics: TopicRegistry,
    handlers: HashMap<Channel, Handler>,
}

impl MessageRouter {
    pub fn new(topics: TopicRegistry) -> Self {
        Self {
            topics,
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for `channel`, returning the one it replaced.
    pub fn register(&mut self, channel: Channel, handler: Handler) -> Option<Handler> {
        self.handlers.insert(channel, handler)
    }

    pub fn remove(&mut self, channel: Channel) -> Option<Handler> {
        self.handlers.remove(&channel)
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.handlers.keys().copied().collect();
        channels.sort_by_key(|c| *c as usize);
        channels
    }

    pub fn handler(&self, channel: Channel) -> Option<Handler> {
        self.handlers.get(&channel).cloned()
    }

    /// Decodes a raw message and resolves its handler.
    ///
    /// Split from [`dispatch`](Self::dispatch) so a caller holding a lock can
    /// resolve under it and run the handler after releasing it.
    pub fn prepare(&self, topic: &str, raw: &[u8]) -> Option<(InboundMessage, Handler)> {
        let Some(channel) = self.topics.resolve(topic) else {
            debug!("Discarding message on unknown topic {}", topic);
            return None;
        };

        let payload = Payload::parse(raw);
        if let Payload::Text(ref text) = payload {
            debug!("Non-JSON payload on {}: {}", topic, text);
        }

        let Some(handler) = self.handler(channel) else {
            debug!("No handler registered for {}", channel);
            return None;
        };

        let message = InboundMessage {
            channel,
            topic: topic.to_string(),
            payload,
            received_at: Local::now(),
        };
        Some((message, handler))
    }

    /// Delivers one raw message. Never panics, never returns an error.
    pub fn dispatch(&self, topic: &str, raw: &[u8]) -> bool {
        match self.prepare(topic, raw) {
            Some((message, handler)) => invoke(&handler, &message),
            None => false,
        }
    }
}

/// Runs a handler, containing both errors and panics. Returns whether it succeeded.
pub fn invoke(handler: &Handler, message: &InboundMessage) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("Handler for {} failed: {:#}", message.topic, e);
            false
        }
        Err(_) => {
            error!("Handler for {} panicked", message.topic);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::eyre;
    use std::sync::Mutex;

    fn recording() -> (Handler, Arc<Mutex<Vec<Payload>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: Handler = Arc::new(move |message: &InboundMessage| {
            sink.lock().unwrap().push(message.payload.clone());
            Ok(())
        });
        (handler, seen)
    }

    #[test]
    fn parsed_json_reaches_sensor_handler() {
        let mut router = MessageRouter::new(TopicRegistry::default());
        let (handler, seen) = recording();
        router.register(Channel::Sensor, handler);

        assert!(router.dispatch("silagung/sensor", br#"{"waterFlow":1.5}"#));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let value = seen[0].as_json().unwrap();
        assert_eq!(value["waterFlow"], 1.5);
    }

    #[test]
    fn invalid_json_is_passed_as_text() {
        let mut router = MessageRouter::new(TopicRegistry::default());
        let (handler, seen) = recording();
        router.register(Channel::Sensor, handler);

        router.dispatch("silagung/sensor", b"{ invalid json");

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], Payload::Text("{ invalid json".to_string()));
        assert!(seen[0].as_json().is_none());
    }

    #[test]
    fn unknown_topic_is_discarded() {
        let mut router = MessageRouter::new(TopicRegistry::default());
        let (handler, seen) = recording();
        router.register(Channel::Sensor, handler);

        assert!(!router.dispatch("elsewhere/sensor", b"{}"));
        assert!(!router.dispatch("silagung/system", b"{}"));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_handlers_do_not_stop_later_messages() {
        let mut router = MessageRouter::new(TopicRegistry::default());
        let erroring: Handler =
            Arc::new(|_: &InboundMessage| -> color_eyre::Result<()> { Err(eyre!("bad state")) });
        let panicking: Handler =
            Arc::new(|_: &InboundMessage| -> color_eyre::Result<()> { panic!("handler bug") });
        router.register(Channel::System, erroring);
        router.register(Channel::Config, panicking);
        let (handler, seen) = recording();
        router.register(Channel::Sensor, handler);

        assert!(!router.dispatch("silagung/system", b"{}"));
        assert!(!router.dispatch("silagung/config", b"{}"));
        assert!(router.dispatch("silagung/sensor", b"42"));

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn last_registration_wins() {
        let mut router = MessageRouter::new(TopicRegistry::default());
        let (first, first_seen) = recording();
        let (second, second_seen) = recording();
        assert!(router.register(Channel::Sensor, first).is_none());
        assert!(router.register(Channel::Sensor, second).is_some());

        router.dispatch("silagung/sensor", b"1");

        assert!(first_seen.lock().unwrap().is_empty());
        assert_eq!(second_seen.lock().unwrap().len(), 1);
        assert_eq!(router.channels(), vec![Channel::Sensor]);
    }
}
