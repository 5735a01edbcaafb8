//! Broker transport.
//!
//! The session core talks to the broker only through [`BrokerLink`]. Every
//! publish and subscription is QoS 1 (at-least-once); a successful call means
//! the client accepted the request, not that the edge device acted on it.

pub mod mqtt;
mod tls;
pub mod topics;

use anyhow::{anyhow, Result};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

pub use mqtt::{spawn_pump, MqttLink, MqttSettings};
pub use tls::{BrokerEndpoint, TlsMaterials};
pub use topics::{validate_segment, InboundTopic, Topics};

pub trait BrokerLink {
    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()>;
    fn subscribe(&mut self, topic: &str) -> Result<()>;
    fn unsubscribe(&mut self, topic: &str) -> Result<()>;
}

/// Connection-level events forwarded from the broker connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// CONNACK received; broker-side subscriptions must be re-established.
    Connected,
    Message { topic: String, payload: Vec<u8> },
    Disconnected(String),
}

#[derive(Debug, Default)]
pub struct LinkLog {
    pub published: Vec<(String, Vec<u8>)>,
    pub subscribed: Vec<String>,
    pub unsubscribed: Vec<String>,
    active: BTreeSet<String>,
    fail_publish: usize,
    fail_subscribe: usize,
}

impl LinkLog {
    /// Topics currently subscribed.
    pub fn active_subscriptions(&self) -> Vec<String> {
        self.active.iter().cloned().collect()
    }
}

/// Recording link used by tests and dry runs. Clones share the same log.
#[derive(Clone, Debug, Default)]
pub struct InMemoryLink {
    log: Arc<Mutex<LinkLog>>,
}

impl InMemoryLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> MutexGuard<'_, LinkLog> {
        match self.log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Fail the next `n` publishes.
    pub fn fail_publishes(&self, n: usize) {
        self.log().fail_publish = n;
    }

    /// Fail the next `n` subscribe calls.
    pub fn fail_subscribes(&self, n: usize) {
        self.log().fail_subscribe = n;
    }

    pub fn published_to(&self, topic: &str) -> Vec<serde_json::Value> {
        self.log()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .filter_map(|(_, payload)| serde_json::from_slice(payload).ok())
            .collect()
    }

    pub fn clear(&self) {
        let mut log = self.log();
        log.published.clear();
        log.subscribed.clear();
        log.unsubscribed.clear();
        log.active.clear();
    }
}

impl BrokerLink for InMemoryLink {
    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let mut log = self.log();
        if log.fail_publish > 0 {
            log.fail_publish -= 1;
            return Err(anyhow!("broker unavailable"));
        }
        log.published.push((topic.to_string(), payload));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<()> {
        let mut log = self.log();
        if log.fail_subscribe > 0 {
            log.fail_subscribe -= 1;
            return Err(anyhow!("broker unavailable"));
        }
        log.subscribed.push(topic.to_string());
        log.active.insert(topic.to_string());
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<()> {
        let mut log = self.log();
        log.unsubscribed.push(topic.to_string());
        log.active.remove(topic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_log() {
        let link = InMemoryLink::new();
        let mut writer = link.clone();
        writer.publish("a/b", b"{}".to_vec()).unwrap();
        assert_eq!(link.log().published.len(), 1);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let link = InMemoryLink::new();
        let mut writer = link.clone();
        link.fail_publishes(1);
        assert!(writer.publish("a/b", vec![]).is_err());
        assert!(writer.publish("a/b", vec![]).is_ok());
        assert_eq!(link.log().published.len(), 1);
    }
}
