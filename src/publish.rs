//! Key/value publishing of controller state
//!
//! Every state change is sent as a [`Param`] on a broadcast channel and kept
//! in a last-value cache so late readers can query current values. Push
//! notifications (connect, start, ...) travel on a separate channel.

use chrono::TimeDelta;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

/// A published value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Param {
    /// Loadpoint index, `None` for site values
    pub loadpoint: Option<usize>,
    pub key: String,
    pub value: Value,
}

/// A push notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushEvent {
    pub loadpoint: Option<usize>,
    pub event: String,
}

type ValueCache = HashMap<(Option<usize>, String), Value>;

/// Publishing handle, optionally scoped to one loadpoint
#[derive(Clone)]
pub struct Publisher {
    loadpoint: Option<usize>,
    params_tx: broadcast::Sender<Param>,
    push_tx: broadcast::Sender<PushEvent>,
    values: Arc<RwLock<ValueCache>>,
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher {
    /// Create a site-level publisher
    pub fn new() -> Self {
        let (params_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (push_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            loadpoint: None,
            params_tx,
            push_tx,
            values: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publisher sharing the same channels, scoped to a loadpoint
    pub fn scoped(&self, loadpoint: usize) -> Self {
        Self {
            loadpoint: Some(loadpoint),
            ..self.clone()
        }
    }

    pub fn loadpoint(&self) -> Option<usize> {
        self.loadpoint
    }

    /// Publish a value
    pub fn publish<T: Serialize>(&self, key: &str, value: T) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((self.loadpoint, key.to_string()), value.clone());

        // no receivers is not an error
        let _ = self.params_tx.send(Param {
            loadpoint: self.loadpoint,
            key: key.to_string(),
            value,
        });
    }

    /// Publish a duration as whole seconds
    pub fn publish_duration(&self, key: &str, value: TimeDelta) {
        self.publish(key, value.num_seconds());
    }

    /// Send a push notification
    pub fn push(&self, event: &str) {
        let _ = self.push_tx.send(PushEvent {
            loadpoint: self.loadpoint,
            event: event.to_string(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Param> {
        self.params_tx.subscribe()
    }

    pub fn subscribe_push(&self) -> broadcast::Receiver<PushEvent> {
        self.push_tx.subscribe()
    }

    /// Last value published under `key` in this publisher's scope
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(self.loadpoint, key.to_string()))
            .cloned()
    }

    /// All last values of this publisher's scope
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|((lp, _), _)| *lp == self.loadpoint)
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_values_are_separate() {
        let site = Publisher::new();
        let lp = site.scoped(0);
        site.publish("gridPower", 100.0);
        lp.publish("chargePower", 2300.0);

        assert_eq!(site.get("gridPower"), Some(Value::from(100.0)));
        assert_eq!(site.get("chargePower"), None);
        assert_eq!(lp.get("chargePower"), Some(Value::from(2300.0)));
        assert_eq!(lp.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn subscribers_receive_params_and_push() {
        let publisher = Publisher::new().scoped(1);
        let mut params = publisher.subscribe();
        let mut push = publisher.subscribe_push();

        publisher.publish_duration("chargeDuration", TimeDelta::minutes(2));
        publisher.push("connect");

        let p = params.recv().await.unwrap();
        assert_eq!(p.loadpoint, Some(1));
        assert_eq!(p.value, Value::from(120));
        assert_eq!(push.recv().await.unwrap().event, "connect");
    }
}
