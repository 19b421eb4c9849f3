//! Generic resource collection: cached list, gated refresh, and optimistic
//! mutations synced through the [`SyncQueue`].
//!
//! Every mutation goes through [`Collection::apply`]:
//!
//! 1. apply the change to the local store (subscribers see it immediately);
//! 2. enqueue the REST calls on the shared sync queue;
//! 3. on failure, put back the affected records and publish an error notice.
//!
//! Rollback is per record, so concurrent edits to other records survive a
//! failed write. When a task carries several changes and one request fails,
//! the requests that already landed are reversed on the server first.

use std::sync::Arc;

use tokio::sync::watch;

use super::http::ApiClient;
use super::live::{LiveUpdates, Subscription};
use super::notice::Notices;
use super::store::ResourceStore;
use super::sync_queue::{SyncQueue, SyncTask};
use crate::domain::{Record, new_id};
use crate::errors::{ClientError, ProductionError, SyncError};

pub const DELETE_PRIORITY: i32 = 3;
pub const CREATE_PRIORITY: i32 = 2;
pub const UPDATE_PRIORITY: i32 = 1;

/// Handle to one resource's client-side state. Cheap to clone.
pub struct Collection<T: Record> {
    store: Arc<ResourceStore<T>>,
    api: ApiClient,
    queue: SyncQueue,
    notices: Notices,
}

impl<T: Record> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            api: self.api.clone(),
            queue: self.queue.clone(),
            notices: self.notices.clone(),
        }
    }
}

impl<T: Record> Collection<T> {
    pub fn new(
        store: Arc<ResourceStore<T>>,
        api: ApiClient,
        queue: SyncQueue,
        notices: Notices,
    ) -> Self {
        Self {
            store,
            api,
            queue,
            notices,
        }
    }

    pub fn store(&self) -> &Arc<ResourceStore<T>> {
        &self.store
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.store.snapshot()
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.store.get(id)
    }

    /// Version receiver that ticks on every local or fetched change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.store.subscribe()
    }

    /// Fetch the full list unless a fetch is already running. Returns
    /// `Ok(false)` when skipped.
    pub async fn try_refresh(&self) -> Result<bool, ClientError> {
        let Some(_fetching) = self.store.try_begin_fetch() else {
            tracing::debug!(resource = T::RESOURCE.label(), "refresh skipped, fetch in flight");
            return Ok(false);
        };
        let records = self.api.list::<T>().await?;
        tracing::debug!(
            resource = T::RESOURCE.label(),
            count = records.len(),
            "refreshed"
        );
        self.store.replace_all(records);
        Ok(true)
    }

    /// Like [`try_refresh`](Self::try_refresh), but failures are only
    /// logged and leave the cache untouched.
    pub async fn refresh(&self) -> bool {
        match self.try_refresh().await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!(resource = T::RESOURCE.label(), error = %e, "refresh failed");
                false
            }
        }
    }

    /// Re-fetch whenever the live channel reports a change to this resource.
    pub fn attach(&self, live: &LiveUpdates) -> Subscription {
        let this = self.clone();
        live.subscribe(&[T::RESOURCE.change_kind()], move |_| {
            let this = this.clone();
            tokio::spawn(async move {
                this.refresh().await;
            });
        })
    }

    /// Add a record locally and POST it in the background. A blank id is
    /// replaced with a fresh one so the optimistic record keeps its identity.
    pub fn create(&self, record: T) -> Result<T, ProductionError> {
        self.apply_one(Change::Create(record))
    }

    /// Replace a cached record locally and PUT it in the background.
    pub fn update(&self, record: T) -> Result<T, ProductionError> {
        self.apply_one(Change::Update(record))
    }

    /// Remove a record locally and DELETE it in the background. Returns the
    /// removed record.
    pub fn delete(&self, id: &str) -> Result<T, ProductionError> {
        self.apply_one(Change::Delete(id.to_string()))
    }

    /// Read-modify-write of one record through [`update`](Self::update).
    pub fn modify<F>(&self, id: &str, f: F) -> Result<T, ProductionError>
    where
        F: FnOnce(&mut T) -> Result<(), ProductionError>,
    {
        let mut record = self.store.get(id).ok_or_else(|| self.not_found(id))?;
        f(&mut record)?;
        self.update(record)
    }

    fn apply_one(&self, change: Change<T>) -> Result<T, ProductionError> {
        let mut applied = self.apply(change.action(), vec![change])?;
        applied
            .pop()
            .ok_or_else(|| ProductionError::validation("change", "nothing was applied"))
    }

    /// Apply several changes locally and sync them as one background task,
    /// in order. Everything is validated before anything is applied; if any
    /// request fails, the requests already sent are reversed on the server
    /// and every change is rolled back locally. Returns the applied records
    /// (removed ones for deletes).
    pub fn apply(&self, action: &str, changes: Vec<Change<T>>) -> Result<Vec<T>, ProductionError> {
        self.apply_for(action, None, changes)
    }

    /// [`apply`](Self::apply) naming `target` in the failure notice instead
    /// of the first change's record.
    pub fn apply_for(
        &self,
        action: &str,
        target: Option<&str>,
        changes: Vec<Change<T>>,
    ) -> Result<Vec<T>, ProductionError> {
        let changes = self.prepare(changes)?;
        let Some(priority) = changes.iter().map(Change::priority).max() else {
            return Ok(Vec::new());
        };

        let mut applied = Vec::with_capacity(changes.len());
        let mut undo = Vec::with_capacity(changes.len());
        let mut reverse = Vec::with_capacity(changes.len());
        for change in &changes {
            match self.apply_local(change) {
                Ok((record, step)) => {
                    applied.push(record);
                    reverse.push(step.reverse_change());
                    undo.push(step);
                }
                Err(e) => {
                    // A concurrent refresh removed a record after `prepare`.
                    for step in undo.into_iter().rev() {
                        step.revert(&self.store);
                    }
                    return Err(e);
                }
            }
        }

        let target = match target {
            Some(target) => target.to_string(),
            None => changes
                .first()
                .map(|c| c.id().to_string())
                .unwrap_or_default(),
        };
        let label = format!("{} {} {}", action, T::RESOURCE.label().to_lowercase(), target);
        let api = self.api.clone();
        let store = self.store.clone();
        let notices = self.notices.clone();
        let action = action.to_string();
        self.queue.enqueue(
            SyncTask::new(label, move || async move {
                for (sent, change) in changes.iter().enumerate() {
                    if let Err(err) = send(&api, change).await {
                        revert_remote(&api, &reverse[..sent]).await;
                        return Err(SyncError::from(err));
                    }
                }
                Ok(())
            })
            .priority(priority)
            .on_error(move |err| {
                for step in undo.into_iter().rev() {
                    step.revert(&store);
                }
                notices.error(failure_message::<T>(&action, &target, &err));
            }),
        );
        Ok(applied)
    }

    fn apply_local(&self, change: &Change<T>) -> Result<(T, Undo<T>), ProductionError> {
        match change {
            Change::Create(record) => {
                self.store.insert(record.clone());
                Ok((record.clone(), Undo::Remove(record.id().to_string())))
            }
            Change::Update(record) => {
                let previous = self
                    .store
                    .replace(record.clone())
                    .ok_or_else(|| self.not_found(record.id()))?;
                let undo = Undo::Restore {
                    written: record.clone(),
                    previous,
                };
                Ok((record.clone(), undo))
            }
            Change::Delete(id) => {
                let (index, removed) = self.store.remove(id).ok_or_else(|| self.not_found(id))?;
                let undo = Undo::Reinsert {
                    index,
                    record: removed.clone(),
                };
                Ok((removed, undo))
            }
        }
    }

    /// Normalize and check every change against the cache before any is applied.
    fn prepare(&self, changes: Vec<Change<T>>) -> Result<Vec<Change<T>>, ProductionError> {
        let mut creating = Vec::new();
        changes
            .into_iter()
            .map(|change| match change {
                Change::Create(mut record) => {
                    if record.id().trim().is_empty() {
                        record.set_id(new_id());
                    }
                    record.touch();
                    record.validate()?;
                    if self.store.contains(record.id()) || creating.contains(&record.id().to_string()) {
                        return Err(ProductionError::validation(
                            "id",
                            format!("{} {} already exists", T::RESOURCE.label(), record.id()),
                        ));
                    }
                    creating.push(record.id().to_string());
                    Ok(Change::Create(record))
                }
                Change::Update(mut record) => {
                    record.touch();
                    record.validate()?;
                    if !self.store.contains(record.id()) {
                        return Err(self.not_found(record.id()));
                    }
                    Ok(Change::Update(record))
                }
                Change::Delete(id) => {
                    if !self.store.contains(&id) {
                        return Err(self.not_found(&id));
                    }
                    Ok(Change::Delete(id))
                }
            })
            .collect()
    }

    fn not_found(&self, id: &str) -> ProductionError {
        ProductionError::RecordNotFound {
            resource: T::RESOURCE.label(),
            id: id.to_string(),
        }
    }
}

/// One record-level change applied through [`Collection::apply`].
#[derive(Debug, Clone)]
pub enum Change<T> {
    Create(T),
    Update(T),
    Delete(String),
}

impl<T: Record> Change<T> {
    /// Deletes outrank creates, which outrank updates.
    pub fn priority(&self) -> i32 {
        match self {
            Self::Delete(_) => DELETE_PRIORITY,
            Self::Create(_) => CREATE_PRIORITY,
            Self::Update(_) => UPDATE_PRIORITY,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Create(record) | Self::Update(record) => record.id(),
            Self::Delete(id) => id,
        }
    }

    fn action(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Update(_) => "update",
            Self::Delete(_) => "delete",
        }
    }
}

enum Undo<T> {
    Remove(String),
    Restore { written: T, previous: T },
    Reinsert { index: usize, record: T },
}

impl<T: Record> Undo<T> {
    /// The request that puts the server back once this change has landed.
    fn reverse_change(&self) -> Change<T> {
        match self {
            Undo::Remove(id) => Change::Delete(id.clone()),
            Undo::Restore { previous, .. } => Change::Update(previous.clone()),
            Undo::Reinsert { record, .. } => Change::Create(record.clone()),
        }
    }

    fn revert(self, store: &ResourceStore<T>) {
        match self {
            Undo::Remove(id) => {
                store.remove(&id);
            }
            Undo::Restore { written, previous } => {
                // Only undo our own write; a newer edit or refresh wins.
                if store.get(written.id()).is_some_and(|current| same_content(&current, &written)) {
                    store.replace(previous);
                }
            }
            Undo::Reinsert { index, record } => store.reinsert(index, record),
        }
    }
}

async fn send<T: Record>(api: &ApiClient, change: &Change<T>) -> Result<(), ClientError> {
    match change {
        Change::Create(record) => api.create(record).await.map(drop),
        Change::Update(record) => api.update(record).await.map(drop),
        Change::Delete(id) => api.delete::<T>(id).await,
    }
}

/// Undo already-sent requests, newest first. Best effort: a failure here is
/// logged and the next refresh shows what the server kept.
async fn revert_remote<T: Record>(api: &ApiClient, landed: &[Change<T>]) {
    for change in landed.iter().rev() {
        if let Err(e) = send(api, change).await {
            tracing::warn!(
                resource = T::RESOURCE.label(),
                id = change.id(),
                error = %e,
                "failed to revert a partially synced change"
            );
        }
    }
}

fn same_content<T: Record>(a: &T, b: &T) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn failure_message<T: Record>(action: &str, id: &str, err: &SyncError) -> String {
    format!(
        "Failed to {} {} {}: {}",
        action,
        T::RESOURCE.label().to_lowercase(),
        id,
        err
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{JobWork, MachineTypeConfig};
    use crate::shop::server::spawn_in_memory;
    use std::time::Duration;

    pub(crate) async fn live_api() -> ApiClient {
        let (addr, _state) = spawn_in_memory().await.unwrap();
        ApiClient::new(&format!("http://{}", addr), Duration::from_secs(5)).unwrap()
    }

    /// A client pointed at a port nothing listens on.
    pub(crate) fn dead_api() -> ApiClient {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        ApiClient::new(&format!("http://{}", addr), Duration::from_secs(2)).unwrap()
    }

    /// Serve a hand-built router on an ephemeral port and return its base URL.
    pub(crate) async fn stub_server(app: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    pub(crate) fn collection<T: Record>(api: ApiClient) -> Collection<T> {
        Collection::new(
            Arc::new(ResourceStore::new()),
            api,
            SyncQueue::default(),
            Notices::new(),
        )
    }

    fn job_work(id: &str, name: &str) -> JobWork {
        JobWork {
            id: id.into(),
            name: name.into(),
            vendor: String::new(),
            contact: String::new(),
            notes: String::new(),
        }
    }

    #[tokio::test]
    async fn test_create_is_visible_before_sync_and_persists() {
        let api = live_api().await;
        let jobs = collection::<JobWork>(api.clone());
        let created = jobs.create(job_work("", "Washing")).unwrap();
        assert!(!created.id.is_empty());
        assert_eq!(jobs.snapshot(), vec![created.clone()]);

        jobs.queue().wait_idle().await;
        assert_eq!(api.list::<JobWork>().await.unwrap(), vec![created]);
        assert!(jobs.notices().recent().is_empty());
    }

    #[tokio::test]
    async fn test_failed_create_rolls_back_with_notice() {
        let jobs = collection::<JobWork>(dead_api());
        let mut notices = jobs.notices().subscribe();
        jobs.create(job_work("jw-1", "Washing")).unwrap();
        assert_eq!(jobs.snapshot().len(), 1);

        jobs.queue().wait_idle().await;
        assert!(jobs.snapshot().is_empty());
        let notice = notices.recv().await.unwrap();
        assert!(notice.message.contains("Failed to create job work jw-1"), "{}", notice);
    }

    #[tokio::test]
    async fn test_slow_server_times_out_and_rolls_back() {
        let app = axum::Router::new().route(
            "/api/job-works",
            axum::routing::post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                axum::http::StatusCode::CREATED
            }),
        );
        let api = ApiClient::new(&stub_server(app).await, Duration::from_millis(200)).unwrap();

        let err = api.create(&job_work("jw-1", "Washing")).await.unwrap_err();
        assert!(
            matches!(&err, ClientError::Network(msg) if msg == "request timed out"),
            "{:?}",
            err
        );

        let jobs = collection::<JobWork>(api);
        jobs.create(job_work("jw-2", "Ironing")).unwrap();
        assert_eq!(jobs.snapshot().len(), 1);

        jobs.queue().wait_idle().await;
        assert!(jobs.snapshot().is_empty());
        let notices = jobs.notices().recent();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].message.contains("request timed out"), "{}", notices[0]);
    }

    #[tokio::test]
    async fn test_failed_update_restores_previous() {
        let store = Arc::new(ResourceStore::with_records(vec![job_work("jw-1", "Washing")]));
        let jobs = Collection::new(store, dead_api(), SyncQueue::default(), Notices::new());

        jobs.modify("jw-1", |jw| {
            jw.name = "Stone washing".into();
            Ok(())
        })
        .unwrap();
        assert_eq!(jobs.get("jw-1").unwrap().name, "Stone washing");

        jobs.queue().wait_idle().await;
        assert_eq!(jobs.get("jw-1").unwrap().name, "Washing");
        assert_eq!(jobs.notices().recent().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delete_reinserts_at_position() {
        let store = Arc::new(ResourceStore::with_records(vec![
            job_work("a", "Cutting"),
            job_work("b", "Printing"),
            job_work("c", "Packing"),
        ]));
        let jobs = Collection::new(store, dead_api(), SyncQueue::default(), Notices::new());
        jobs.delete("b").unwrap();
        assert_eq!(jobs.snapshot().len(), 2);

        jobs.queue().wait_idle().await;
        let ids: Vec<String> = jobs.snapshot().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_local_validation_and_missing_records() {
        let jobs = collection::<MachineTypeConfig>(dead_api());
        let bad = MachineTypeConfig {
            id: String::new(),
            name: "Overlock".into(),
            stations: 0,
            color: None,
        };
        assert!(jobs.create(bad).is_err());
        assert!(jobs.snapshot().is_empty());
        assert!(matches!(
            jobs.delete("missing"),
            Err(ProductionError::RecordNotFound { .. })
        ));
        assert!(jobs.queue().is_idle());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_gated_and_idempotent() {
        let api = live_api().await;
        api.create(&job_work("jw-1", "Washing")).await.unwrap();
        let jobs = collection::<JobWork>(api);

        let (a, b) = tokio::join!(jobs.try_refresh(), jobs.try_refresh());
        let fetched = [a.unwrap(), b.unwrap()];
        assert_eq!(fetched.iter().filter(|f| **f).count(), 1);
        let first = jobs.snapshot();

        assert!(jobs.refresh().await);
        assert_eq!(jobs.snapshot(), first);
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_cache() {
        let store = Arc::new(ResourceStore::with_records(vec![job_work("jw-1", "Washing")]));
        let jobs = Collection::new(store, dead_api(), SyncQueue::default(), Notices::new());
        assert!(!jobs.refresh().await);
        assert_eq!(jobs.snapshot().len(), 1);
        assert!(!jobs.store().is_fetching());
    }

    #[tokio::test]
    async fn test_attached_collection_follows_remote_changes() {
        let (addr, _state) = spawn_in_memory().await.unwrap();
        let base = format!("http://{}", addr);
        let api = ApiClient::new(&base, Duration::from_secs(5)).unwrap();

        let live = LiveUpdates::connect(&base, &crate::config::LiveSection::default()).unwrap();
        let mut states = live.watch_state();
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| *s == crate::client::live::LinkState::Connected),
        )
        .await
        .unwrap()
        .unwrap();

        let watcher = collection::<JobWork>(api.clone());
        let _sub = watcher.attach(&live);
        let mut versions = watcher.subscribe();

        let writer = collection::<JobWork>(api);
        writer.create(job_work("jw-9", "Ironing")).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                versions.changed().await.unwrap();
                if watcher.get("jw-9").is_some() {
                    break;
                }
            }
        })
        .await
        .unwrap();
        live.shutdown().await;
    }
}
