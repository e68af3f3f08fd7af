//! REST hub client with a polling change feed

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{EntityState, Hub, ServiceCall, StateChanged};
use crate::config::HubConfig;

#[derive(Clone)]
pub struct RestHub {
    client: Client,
    base: Url,
    token: Option<String>,
    poll_interval: Duration,
    watched: Arc<RwLock<Vec<String>>>,
    changes: broadcast::Sender<StateChanged>,
}

impl RestHub {
    pub fn new(config: &HubConfig) -> Result<Self> {
        let mut base =
            Url::parse(&config.url).map_err(|e| anyhow!("Invalid hub url {}: {}", config.url, e))?;
        // join() replaces the last segment unless the path ends in '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        let (changes, _) = broadcast::channel(256);
        Ok(Self {
            client,
            base,
            token: config.token.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(100)),
            watched: Arc::new(RwLock::new(Vec::new())),
            changes,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| anyhow!("Invalid hub path {}: {}", path, e))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Spawn the poller. Each watched entity is fetched every interval and a
    /// change is broadcast when the fetched state differs from the last one.
    pub fn start_poller(&self, shutdown: CancellationToken) {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut last: HashMap<String, Option<EntityState>> = HashMap::new();
            let mut ticker = tokio::time::interval(hub.poll_interval);
            info!("Hub poller started ({:?})", hub.poll_interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Hub poller shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let watched = hub.watched.read().await.clone();
                        last.retain(|k, _| watched.contains(k));
                        for entity_id in watched {
                            let current = match hub.get_state(&entity_id).await {
                                Ok(s) => s,
                                Err(e) => {
                                    debug!("Hub poll {} failed: {}", entity_id, e);
                                    continue;
                                }
                            };
                            let changed = last.get(&entity_id) != Some(&current);
                            if changed {
                                last.insert(entity_id.clone(), current.clone());
                                if hub.changes.send(StateChanged {
                                    entity_id,
                                    new_state: current,
                                }).is_err() {
                                    debug!("Hub change dropped: no subscribers");
                                }
                            }
                        }
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Hub for RestHub {
    async fn get_state(&self, entity_id: &str) -> Result<Option<EntityState>> {
        let url = self.endpoint(&format!("api/states/{}", entity_id))?;
        let response = self.authorized(self.client.get(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow!("Hub state request failed: {}", response.status()));
        }
        Ok(Some(response.json().await?))
    }

    async fn call_service(&self, call: &ServiceCall) -> Result<()> {
        let url = self.endpoint(&format!("api/services/{}/{}", call.domain, call.service))?;
        let response = self
            .authorized(self.client.post(url))
            .json(&call.data)
            .send()
            .await?;
        if !response.status().is_success() {
            warn!("Hub service {} returned {}", call, response.status());
            return Err(anyhow!("Hub service call {} failed: {}", call, response.status()));
        }
        Ok(())
    }

    async fn watch(&self, entity_ids: Vec<String>) {
        *self.watched.write().await = entity_ids;
    }

    fn subscribe(&self) -> broadcast::Receiver<StateChanged> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> HubConfig {
        HubConfig {
            url: url.to_string(),
            token: Some("t".into()),
            poll_interval_ms: 10,
        }
    }

    #[test]
    fn test_endpoints_join_base() {
        let hub = RestHub::new(&config("http://hub.local:8123/")).unwrap();
        assert_eq!(
            hub.endpoint("api/states/light.kitchen").unwrap().as_str(),
            "http://hub.local:8123/api/states/light.kitchen"
        );
        assert_eq!(hub.poll_interval, Duration::from_millis(100));

        let prefixed = RestHub::new(&config("http://hub.local/ha")).unwrap();
        assert_eq!(
            prefixed.endpoint("api/services/light/turn_on").unwrap().as_str(),
            "http://hub.local/ha/api/services/light/turn_on"
        );
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(RestHub::new(&config("not a url")).is_err());
    }
}
