use std::collections::BTreeMap;

use lapin::message::BasicReturnMessage;
use lapin::BasicProperties;
use serde::Serialize;
use serde_json::Value;

use crate::topology::amqp_table;

/// Highest AMQP message priority honored by RabbitMQ queues declared with
/// `x-max-priority`.
pub const MAX_PRIORITY: u8 = 9;

/// An outgoing message plus the subset of AMQP basic properties this crate
/// exposes. Build one with the chainable setters, then hand it to a
/// [`Publisher`](crate::Publisher).
#[derive(Clone, Debug, Default)]
pub struct OutboundMessage {
    pub headers: BTreeMap<String, Value>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    /// Persistent messages survive a broker restart when routed to a
    /// durable queue. Maps to delivery mode 2 (1 when transient).
    pub persistent: bool,
    /// Clamped to 0..=9 when rendered.
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    /// Per-message TTL in milliseconds. Negative values are clamped to zero.
    pub ttl_ms: Option<i64>,
    pub message_id: Option<String>,
    /// Unix timestamp in seconds.
    pub timestamp: Option<u64>,
    /// The AMQP `type` property.
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
    pub body: Vec<u8>,
}

impl OutboundMessage {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Serializes `value` as a JSON body, stamped with the matching content
    /// type and the current time.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_vec(value)?)
            .content_type("application/json")
            .timestamp_now())
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn content_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.content_encoding = Some(encoding.into());
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn timestamp(mut self, unix_seconds: u64) -> Self {
        self.timestamp = Some(unix_seconds);
        self
    }

    pub fn timestamp_now(self) -> Self {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.timestamp(now)
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub(crate) fn properties(&self) -> BasicProperties {
        let mut props =
            BasicProperties::default().with_delivery_mode(if self.persistent { 2 } else { 1 });

        if !self.headers.is_empty() {
            props = props.with_headers(amqp_table(&self.headers));
        }
        if let Some(content_type) = &self.content_type {
            props = props.with_content_type(content_type.as_str().into());
        }
        if let Some(encoding) = &self.content_encoding {
            props = props.with_content_encoding(encoding.as_str().into());
        }
        if let Some(priority) = self.priority {
            props = props.with_priority(priority.min(MAX_PRIORITY));
        }
        if let Some(id) = &self.correlation_id {
            props = props.with_correlation_id(id.as_str().into());
        }
        if let Some(reply_to) = &self.reply_to {
            props = props.with_reply_to(reply_to.as_str().into());
        }
        if let Some(ttl) = self.ttl_ms {
            props = props.with_expiration(ttl.max(0).to_string().into());
        }
        if let Some(id) = &self.message_id {
            props = props.with_message_id(id.as_str().into());
        }
        if let Some(timestamp) = self.timestamp {
            props = props.with_timestamp(timestamp);
        }
        if let Some(kind) = &self.kind {
            props = props.with_kind(kind.as_str().into());
        }
        if let Some(user_id) = &self.user_id {
            props = props.with_user_id(user_id.as_str().into());
        }
        if let Some(app_id) = &self.app_id {
            props = props.with_app_id(app_id.as_str().into());
        }

        props
    }
}

/// Where and how a message is published.
#[derive(Clone, Debug, Default)]
pub struct PublishOpts {
    pub exchange: String,
    pub routing_key: String,
    /// Ask the broker to return the message instead of silently dropping it
    /// when no queue matches the routing key. Returned messages surface on
    /// [`Publisher::message_returns`](crate::Publisher::message_returns).
    pub mandatory: bool,
    pub immediate: bool,
}

impl PublishOpts {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            ..Self::default()
        }
    }

    pub fn mandatory(mut self, mandatory: bool) -> Self {
        self.mandatory = mandatory;
        self
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }
}

/// A message the broker handed back as unroutable.
#[derive(Clone, Debug)]
pub struct ReturnedMessage {
    pub reply_code: u16,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
    pub correlation_id: Option<String>,
    pub body: Vec<u8>,
}

impl From<BasicReturnMessage> for ReturnedMessage {
    fn from(message: BasicReturnMessage) -> Self {
        let correlation_id = message
            .delivery
            .properties
            .correlation_id()
            .as_ref()
            .map(|id| id.as_str().to_string());
        Self {
            reply_code: message.reply_code,
            reply_text: message.reply_text.to_string(),
            exchange: message.delivery.exchange.as_str().to_string(),
            routing_key: message.delivery.routing_key.as_str().to_string(),
            correlation_id,
            body: message.delivery.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_mode_follows_persistence() {
        let transient = OutboundMessage::new("x").properties();
        assert_eq!(transient.delivery_mode(), &Some(1));

        let persistent = OutboundMessage::new("x").persistent(true).properties();
        assert_eq!(persistent.delivery_mode(), &Some(2));
    }

    #[test]
    fn priority_is_clamped_to_nine() {
        let props = OutboundMessage::new("x").priority(42).properties();
        assert_eq!(props.priority(), &Some(MAX_PRIORITY));

        let props = OutboundMessage::new("x").priority(3).properties();
        assert_eq!(props.priority(), &Some(3));
    }

    #[test]
    fn negative_ttl_is_clamped_to_zero() {
        let props = OutboundMessage::new("x").ttl_ms(-500).properties();
        assert_eq!(
            props.expiration().as_ref().map(|e| e.as_str()),
            Some("0")
        );

        let props = OutboundMessage::new("x").ttl_ms(2_000).properties();
        assert_eq!(
            props.expiration().as_ref().map(|e| e.as_str()),
            Some("2000")
        );
    }

    #[test]
    fn json_body_sets_content_type_and_timestamp() {
        #[derive(Serialize)]
        struct Ping {
            seq: u32,
        }

        let message = OutboundMessage::json(&Ping { seq: 7 }).unwrap();
        assert_eq!(message.content_type.as_deref(), Some("application/json"));
        assert!(message.timestamp.is_some());
        assert_eq!(message.body, br#"{"seq":7}"#);
    }

    #[test]
    fn publish_opts_builder() {
        let opts = PublishOpts::new("events", "user.created").mandatory(true);
        assert_eq!(opts.exchange, "events");
        assert_eq!(opts.routing_key, "user.created");
        assert!(opts.mandatory);
        assert!(!opts.immediate);
    }
}
