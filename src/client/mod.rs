//! Client tier: cached collections with optimistic writes, a bounded sync
//! queue, and the live-update subscription that keeps caches fresh.
//!
//! ```text
//!  Pipeline / Restok / Roadmaps / JobWorks / MachineTypes
//!        │ (Deref)
//!        v
//!  Collection<T> ──apply──> ResourceStore<T>   (optimistic, versioned)
//!        │                        ^
//!        │ enqueue                │ rollback on error
//!        v                        │
//!    SyncQueue ──(≤3)──> ApiClient ──HTTP──> shop server
//!                                               │
//!  LiveUpdates <──────────── SSE / polling ─────┘
//!        │ callback
//!        └──> Collection::refresh()
//! ```

pub mod catalog;
pub mod collection;
pub mod http;
pub mod live;
pub mod notice;
pub mod pipeline;
pub mod restok;
pub mod roadmaps;
pub mod store;
pub mod sync_queue;

use std::sync::Arc;

use crate::config::ShopfloorToml;
use crate::domain::Resource;
use crate::errors::ClientError;

pub use catalog::{JobWorks, MachineTypes};
pub use collection::{Change, Collection};
pub use http::ApiClient;
pub use live::{LinkState, LiveConfig, LiveUpdates, PushTransport, SseTransport, Subscription};
pub use notice::{Notice, NoticeLevel, Notices};
pub use pipeline::Pipeline;
pub use restok::Restok;
pub use roadmaps::Roadmaps;
pub use store::ResourceStore;
pub use sync_queue::{QueueStats, SyncQueue, SyncTask};

/// Every resource collection wired to one API client, sync queue and
/// notice channel.
#[derive(Clone)]
pub struct ShopClient {
    pub api: ApiClient,
    pub queue: SyncQueue,
    pub notices: Notices,
    pub pipeline: Pipeline,
    pub restok: Restok,
    pub roadmaps: Roadmaps,
    pub job_works: JobWorks,
    pub machine_types: MachineTypes,
}

impl ShopClient {
    /// Build with fresh, empty stores.
    pub fn new(api: ApiClient, queue: SyncQueue, notices: Notices) -> Self {
        Self {
            pipeline: Pipeline::new(Collection::new(
                Arc::new(ResourceStore::new()),
                api.clone(),
                queue.clone(),
                notices.clone(),
            )),
            restok: Restok::new(Collection::new(
                Arc::new(ResourceStore::new()),
                api.clone(),
                queue.clone(),
                notices.clone(),
            )),
            roadmaps: Roadmaps::new(Collection::new(
                Arc::new(ResourceStore::new()),
                api.clone(),
                queue.clone(),
                notices.clone(),
            )),
            job_works: JobWorks::new(Collection::new(
                Arc::new(ResourceStore::new()),
                api.clone(),
                queue.clone(),
                notices.clone(),
            )),
            machine_types: MachineTypes::new(Collection::new(
                Arc::new(ResourceStore::new()),
                api.clone(),
                queue.clone(),
                notices.clone(),
            )),
            api,
            queue,
            notices,
        }
    }

    pub fn from_config(config: &ShopfloorToml) -> Result<Self, ClientError> {
        let api = ApiClient::from_config(&config.client)?;
        Ok(Self::new(
            api,
            SyncQueue::new(config.sync.max_concurrent),
            Notices::new(),
        ))
    }

    /// Fetch every collection. Returns the fetches that failed, labelled by
    /// resource; a fetch skipped because another is in flight is not a
    /// failure.
    pub async fn refresh_all(&self) -> Vec<(&'static str, ClientError)> {
        let results = tokio::join!(
            self.pipeline.try_refresh(),
            self.restok.try_refresh(),
            self.roadmaps.try_refresh(),
            self.job_works.try_refresh(),
            self.machine_types.try_refresh(),
        );
        let failures: Vec<_> = [
            (Resource::WorkOrders, results.0),
            (Resource::Items, results.1),
            (Resource::Roadmaps, results.2),
            (Resource::JobWorks, results.3),
            (Resource::MachineTypes, results.4),
        ]
        .into_iter()
        .filter_map(|(resource, result)| result.err().map(|e| (resource.label(), e)))
        .collect();
        for (resource, error) in &failures {
            tracing::warn!(resource = *resource, error = %error, "refresh failed");
        }
        failures
    }

    /// Re-fetch each collection when its change kind arrives. Keep the
    /// returned guards alive for as long as updates are wanted.
    pub fn attach_all(&self, live: &LiveUpdates) -> Vec<Subscription> {
        vec![
            self.pipeline.attach(live),
            self.restok.attach(live),
            self.roadmaps.attach(live),
            self.job_works.attach(live),
            self.machine_types.attach(live),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LiveSection;
    use crate::domain::{Item, JobWork};
    use crate::shop::server::spawn_in_memory;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shop_client_refreshes_every_collection() {
        let (addr, _state) = spawn_in_memory().await.unwrap();
        let mut config = ShopfloorToml::default();
        config.client.base_url = format!("http://{}", addr);
        let client = ShopClient::from_config(&config).unwrap();
        assert!(client.refresh_all().await.is_empty());
        assert!(client.pipeline.store().is_loaded());
        assert_eq!(client.queue.max_concurrent(), 3);
    }

    #[tokio::test]
    async fn test_refresh_all_counts_only_real_failures() {
        let (addr, _state) = spawn_in_memory().await.unwrap();
        let mut config = ShopfloorToml::default();
        config.client.base_url = format!("http://{}", addr);
        let client = ShopClient::from_config(&config).unwrap();

        // A fetch already in flight is skipped, not failed.
        let gate = client.pipeline.store().try_begin_fetch().unwrap();
        assert!(client.refresh_all().await.is_empty());
        drop(gate);

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        config.client.base_url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let offline = ShopClient::from_config(&config).unwrap();
        let failures = offline.refresh_all().await;
        assert_eq!(failures.len(), 5);
        assert_eq!(failures[0].0, "Work order");
        assert!(failures.iter().all(|(_, e)| e.is_network()));
    }

    #[tokio::test]
    async fn test_two_clients_converge_through_live_updates() {
        let (addr, _state) = spawn_in_memory().await.unwrap();
        let base = format!("http://{}", addr);
        let mut config = ShopfloorToml::default();
        config.client.base_url = base.clone();

        let watcher = ShopClient::from_config(&config).unwrap();
        let live = LiveUpdates::connect(&base, &LiveSection::default()).unwrap();
        let _subs = watcher.attach_all(&live);
        assert_eq!(live.subscriber_count(), 5);
        let mut states = live.watch_state();
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| *s == LinkState::Connected),
        )
        .await
        .unwrap()
        .unwrap();

        let editor = ShopClient::from_config(&config).unwrap();
        editor
            .job_works
            .create(JobWork {
                id: "jw-dye".into(),
                name: "Dyeing".into(),
                vendor: String::new(),
                contact: String::new(),
                notes: String::new(),
            })
            .unwrap();
        editor
            .restok
            .create(Item {
                id: "item-btn".into(),
                name: "Buttons".into(),
                unit: "gross".into(),
                quantity: 3,
                min_quantity: 10,
                sub_items: vec![],
                updated_at: String::new(),
            })
            .unwrap();
        editor.queue.wait_idle().await;

        let mut jobs = watcher.job_works.subscribe();
        let mut items = watcher.restok.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            while watcher.job_works.get("jw-dye").is_none() {
                jobs.changed().await.unwrap();
            }
            while watcher.restok.get("item-btn").is_none() {
                items.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert_eq!(watcher.restok.low_stock().len(), 1);
        live.shutdown().await;
    }
}
