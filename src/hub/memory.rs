//! Static in-memory hub
//!
//! Used when no hub is configured (commands are only logged) and by tests to
//! drive state changes.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{EntityState, Hub, ServiceCall, StateChanged};

#[derive(Default)]
struct Inner {
    states: HashMap<String, EntityState>,
    watched: BTreeSet<String>,
    calls: Vec<ServiceCall>,
}

#[derive(Clone)]
pub struct StaticHub {
    inner: Arc<Mutex<Inner>>,
    changes: broadcast::Sender<StateChanged>,
}

impl Default for StaticHub {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticHub {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit(&self, change: StateChanged) {
        if self.changes.send(change).is_err() {
            debug!("static hub: change dropped, no subscribers");
        }
    }

    /// Set a state; watched entities emit a change
    pub fn set_state(&self, state: EntityState) {
        let entity_id = state.entity_id.clone();
        let watched = {
            let mut inner = self.lock();
            inner.states.insert(entity_id.clone(), state.clone());
            inner.watched.contains(&entity_id)
        };
        if watched {
            self.emit(StateChanged {
                entity_id,
                new_state: Some(state),
            });
        }
    }

    pub fn remove_state(&self, entity_id: &str) {
        let watched = {
            let mut inner = self.lock();
            inner.states.remove(entity_id);
            inner.watched.contains(entity_id)
        };
        if watched {
            self.emit(StateChanged {
                entity_id: entity_id.to_string(),
                new_state: None,
            });
        }
    }

    /// Service calls received so far
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.lock().calls.clone()
    }

    pub fn watched(&self) -> BTreeSet<String> {
        self.lock().watched.clone()
    }
}

#[async_trait]
impl Hub for StaticHub {
    async fn get_state(&self, entity_id: &str) -> Result<Option<EntityState>> {
        Ok(self.lock().states.get(entity_id).cloned())
    }

    async fn call_service(&self, call: &ServiceCall) -> Result<()> {
        info!("static hub: {} {:?}", call, call.data);
        self.lock().calls.push(call.clone());
        Ok(())
    }

    async fn watch(&self, entity_ids: Vec<String>) {
        self.lock().watched = entity_ids.into_iter().collect();
    }

    fn subscribe(&self) -> broadcast::Receiver<StateChanged> {
        self.changes.subscribe()
    }
}
