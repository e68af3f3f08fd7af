//! In-memory transport that records every publish

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::Transport;
use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[derive(Default)]
struct Inner {
    log: Vec<Published>,
    fail_topics: Vec<String>,
}

/// Records publishes in order and keeps a broker-like retained map
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Every publish so far, in order
    pub fn published(&self) -> Vec<Published> {
        self.with_inner(|i| i.log.clone())
    }

    pub fn published_to(&self, topic: &str) -> Vec<Published> {
        self.with_inner(|i| i.log.iter().filter(|p| p.topic == topic).cloned().collect())
    }

    /// Last payload published to `topic`
    pub fn last(&self, topic: &str) -> Option<Published> {
        self.with_inner(|i| i.log.iter().rev().find(|p| p.topic == topic).cloned())
    }

    /// What a new subscriber would receive: last retained payload per topic,
    /// with empty payloads clearing the topic
    pub fn retained(&self) -> BTreeMap<String, String> {
        self.with_inner(|i| {
            let mut map = BTreeMap::new();
            for p in i.log.iter().filter(|p| p.retain) {
                if p.payload.is_empty() {
                    map.remove(&p.topic);
                } else {
                    map.insert(p.topic.clone(), p.payload.clone());
                }
            }
            map
        })
    }

    pub fn clear(&self) {
        self.with_inner(|i| i.log.clear());
    }

    /// Make publishes to `topic` fail
    pub fn fail_on(&self, topic: impl Into<String>) {
        let topic = topic.into();
        self.with_inner(|i| i.fail_topics.push(topic));
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<()> {
        self.with_inner(|i| {
            if i.fail_topics.iter().any(|t| t == topic) {
                return Err(BridgeError::publish(topic, "injected failure"));
            }
            i.log.push(Published {
                topic: topic.to_string(),
                payload: payload.to_string(),
                retain,
            });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retained_view_applies_clears() {
        let t = MemoryTransport::new();
        t.publish("a", "1", true).await.unwrap();
        t.publish("b", "2", true).await.unwrap();
        t.publish("a", "", true).await.unwrap();
        t.publish("c", "x", false).await.unwrap();

        let retained = t.retained();
        assert_eq!(retained.len(), 1);
        assert_eq!(retained.get("b").map(String::as_str), Some("2"));
        assert_eq!(t.published().len(), 4);
        assert_eq!(t.last("a").unwrap().payload, "");
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let t = MemoryTransport::new();
        t.fail_on("bad");
        assert!(t.publish("bad", "x", false).await.is_err());
        assert!(t.published().is_empty());
    }
}
