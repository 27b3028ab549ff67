//! Declarative broker topology: exchanges, queues and bindings.
//!
//! A [`Topology`] is pure data. It is attached to a session at construction
//! time and re-applied every time a channel is (re)opened. Declarations use
//! the same parameters each time, which AMQP treats as a no-op, so applying
//! a topology twice never errors.

use std::collections::BTreeMap;
use std::path::Path;

use amq_protocol_types::{AMQPValue, FieldArray, FieldTable};
use anyhow::Context;
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::{Channel, ExchangeKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub type Arguments = BTreeMap<String, Value>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl ExchangeType {
    fn as_lapin(self) -> ExchangeKind {
        match self {
            ExchangeType::Direct => ExchangeKind::Direct,
            ExchangeType::Fanout => ExchangeKind::Fanout,
            ExchangeType::Topic => ExchangeKind::Topic,
            ExchangeType::Headers => ExchangeKind::Headers,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Exchange {
    pub name: String,
    #[serde(default)]
    pub kind: ExchangeType,
    #[serde(default)]
    pub durable: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub arguments: Arguments,
}

impl Exchange {
    pub fn new(name: impl Into<String>, kind: ExchangeType) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Self::default()
        }
    }

    pub fn direct(name: impl Into<String>) -> Self {
        Self::new(name, ExchangeType::Direct)
    }

    pub fn fanout(name: impl Into<String>) -> Self {
        Self::new(name, ExchangeType::Fanout)
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self::new(name, ExchangeType::Topic)
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }

    pub fn argument(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    pub(crate) async fn declare(&self, channel: &Channel) -> lapin::Result<()> {
        debug!(exchange = %self.name, kind = ?self.kind, "declaring exchange");
        channel
            .exchange_declare(
                &self.name,
                self.kind.as_lapin(),
                ExchangeDeclareOptions {
                    durable: self.durable,
                    auto_delete: self.auto_delete,
                    internal: self.internal,
                    ..ExchangeDeclareOptions::default()
                },
                amqp_table(&self.arguments),
            )
            .await
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Queue {
    pub name: String,
    #[serde(default)]
    pub durable: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub arguments: Arguments,
}

impl Queue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn argument(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    pub(crate) async fn declare(&self, channel: &Channel) -> lapin::Result<()> {
        debug!(queue = %self.name, "declaring queue");
        channel
            .queue_declare(
                &self.name,
                QueueDeclareOptions {
                    durable: self.durable,
                    auto_delete: self.auto_delete,
                    exclusive: self.exclusive,
                    ..QueueDeclareOptions::default()
                },
                amqp_table(&self.arguments),
            )
            .await
            .map(|_| ())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Binding {
    pub exchange: String,
    pub queue: String,
    /// One binding is declared per routing key; an empty list binds with the
    /// empty routing key (fanout semantics).
    #[serde(default)]
    pub routing_keys: Vec<String>,
    #[serde(default)]
    pub arguments: Arguments,
}

impl Binding {
    pub fn new(exchange: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            ..Self::default()
        }
    }

    pub fn routing_key(mut self, key: impl Into<String>) -> Self {
        self.routing_keys.push(key.into());
        self
    }

    pub fn argument(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    pub(crate) async fn declare(&self, channel: &Channel) -> lapin::Result<()> {
        let keys: &[String] = if self.routing_keys.is_empty() {
            &[String::new()][..]
        } else {
            &self.routing_keys
        };
        for key in keys {
            debug!(
                exchange = %self.exchange,
                queue = %self.queue,
                routing_key = %key,
                "binding queue"
            );
            channel
                .queue_bind(
                    &self.queue,
                    &self.exchange,
                    key,
                    QueueBindOptions::default(),
                    amqp_table(&self.arguments),
                )
                .await?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub exchanges: Vec<Exchange>,
    #[serde(default)]
    pub queues: Vec<Queue>,
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exchange(mut self, exchange: Exchange) -> Self {
        self.exchanges.push(exchange);
        self
    }

    pub fn queue(mut self, queue: Queue) -> Self {
        self.queues.push(queue);
        self
    }

    pub fn binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty() && self.queues.is_empty() && self.bindings.is_empty()
    }

    /// Loads a topology from a JSON document.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("topology document contains invalid JSON")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read topology file at {}", path.display()))?;
        Self::from_json_str(&content)
    }

    /// Applies the topology in dependency order: exchanges, queues, bindings.
    pub(crate) async fn declare(&self, channel: &Channel) -> lapin::Result<()> {
        for exchange in &self.exchanges {
            exchange.declare(channel).await?;
        }
        for queue in &self.queues {
            queue.declare(channel).await?;
        }
        for binding in &self.bindings {
            binding.declare(channel).await?;
        }
        Ok(())
    }
}

/// Converts a JSON argument map into an AMQP field table.
pub(crate) fn amqp_table(arguments: &Arguments) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in arguments {
        table.insert(key.as_str().into(), amqp_value(value));
    }
    table
}

fn amqp_value(value: &Value) -> AMQPValue {
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(b) => AMQPValue::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                AMQPValue::LongLongInt(i)
            } else {
                AMQPValue::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => AMQPValue::LongString(s.as_str().into()),
        Value::Array(items) => {
            let mut array = FieldArray::default();
            for item in items {
                array.push(amqp_value(item));
            }
            AMQPValue::FieldArray(array)
        }
        Value::Object(map) => {
            let mut table = FieldTable::default();
            for (key, nested) in map {
                table.insert(key.as_str().into(), amqp_value(nested));
            }
            AMQPValue::FieldTable(table)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builders_compose_a_topology() {
        let topology = Topology::new()
            .exchange(Exchange::topic("events").durable(true))
            .queue(
                Queue::new("events.audit")
                    .durable(true)
                    .argument("x-max-priority", 9),
            )
            .binding(
                Binding::new("events", "events.audit")
                    .routing_key("user.*")
                    .routing_key("order.*"),
            );

        assert_eq!(topology.exchanges.len(), 1);
        assert_eq!(topology.queues.len(), 1);
        assert_eq!(topology.bindings[0].routing_keys.len(), 2);
        assert!(!topology.is_empty());
    }

    #[test]
    fn loads_from_json() {
        let doc = r##"{
            "exchanges": [{"name": "events", "kind": "topic", "durable": true}],
            "queues": [{"name": "audit", "durable": true}],
            "bindings": [{"exchange": "events", "queue": "audit", "routing_keys": ["#"]}]
        }"##;

        let topology = Topology::from_json_str(doc).unwrap();
        assert_eq!(topology.exchanges[0].kind, ExchangeType::Topic);
        assert!(topology.queues[0].durable);
        assert_eq!(topology.bindings[0].routing_keys, vec!["#"]);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(Topology::from_json_str("{ not json").is_err());
    }

    #[test]
    fn argument_maps_convert_to_field_tables() {
        let mut args = Arguments::new();
        args.insert("x-message-ttl".into(), json!(60_000));
        args.insert("x-dead-letter-exchange".into(), json!("dlx"));
        args.insert("x-single-active-consumer".into(), json!(true));
        args.insert("x-weight".into(), json!(0.5));

        let table = amqp_table(&args);
        let get = |wanted: &str| {
            table
                .inner()
                .iter()
                .find(|(key, _)| key.as_str() == wanted)
                .map(|(_, value)| value.clone())
        };
        assert_eq!(get("x-message-ttl"), Some(AMQPValue::LongLongInt(60_000)));
        assert_eq!(
            get("x-dead-letter-exchange"),
            Some(AMQPValue::LongString("dlx".into()))
        );
        assert_eq!(
            get("x-single-active-consumer"),
            Some(AMQPValue::Boolean(true))
        );
        assert_eq!(get("x-weight"), Some(AMQPValue::Double(0.5)));
    }
}
