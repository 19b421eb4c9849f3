//! Production pipeline: work orders and their step progression.

use std::ops::Deref;

use super::collection::{Change, Collection};
use crate::domain::{PathStep, WorkOrder};
use crate::errors::ProductionError;

/// Work-order collection with progression operations. Derefs to the
/// underlying [`Collection`] for generic CRUD.
#[derive(Clone)]
pub struct Pipeline {
    orders: Collection<WorkOrder>,
}

impl Deref for Pipeline {
    type Target = Collection<WorkOrder>;

    fn deref(&self) -> &Self::Target {
        &self.orders
    }
}

impl Pipeline {
    pub fn new(orders: Collection<WorkOrder>) -> Self {
        Self { orders }
    }

    /// Create a not-started order with every step pending. The order is
    /// visible immediately; the POST runs in the background.
    pub fn create_order(
        &self,
        name: &str,
        product: &str,
        quantity: u32,
        steps: Vec<PathStep>,
    ) -> Result<WorkOrder, ProductionError> {
        let order = WorkOrder::new(name, product, quantity, steps)?;
        self.orders.create(order)
    }

    pub fn advance(&self, id: &str) -> Result<WorkOrder, ProductionError> {
        self.orders.modify(id, WorkOrder::advance)
    }

    pub fn retreat(&self, id: &str) -> Result<WorkOrder, ProductionError> {
        self.orders.modify(id, WorkOrder::retreat)
    }

    pub fn hold(&self, id: &str) -> Result<WorkOrder, ProductionError> {
        self.orders.modify(id, WorkOrder::hold)
    }

    pub fn resume(&self, id: &str) -> Result<WorkOrder, ProductionError> {
        self.orders.modify(id, WorkOrder::resume)
    }

    pub fn record_progress(&self, id: &str, done: u32) -> Result<WorkOrder, ProductionError> {
        self.orders.modify(id, |order| order.record_progress(done))
    }

    /// Split batches off an order. Returns the remainder followed by the
    /// new child orders. Remainder and children sync as one task and roll
    /// back together.
    pub fn split(&self, id: &str, batches: &[u32]) -> Result<Vec<WorkOrder>, ProductionError> {
        let mut remainder = self
            .orders
            .get(id)
            .ok_or_else(|| ProductionError::WorkOrderNotFound { id: id.to_string() })?;
        let children = remainder.split(batches)?;

        let mut changes = Vec::with_capacity(children.len() + 1);
        changes.push(Change::Update(remainder));
        changes.extend(children.into_iter().map(Change::Create));
        self.orders.apply("split", changes)
    }

    /// Delete an order. The server unlinks split children from a deleted
    /// parent, so cached children are unlinked in the same task; they sync
    /// before the delete so a failure restores them against a live parent.
    pub fn delete_order(&self, id: &str) -> Result<WorkOrder, ProductionError> {
        let mut changes: Vec<Change<WorkOrder>> = self
            .orders
            .snapshot()
            .into_iter()
            .filter(|o| o.parent_id.as_deref() == Some(id))
            .map(|mut child| {
                child.parent_id = None;
                Change::Update(child)
            })
            .collect();
        changes.push(Change::Delete(id.to_string()));
        let mut applied = self.orders.apply_for("delete", Some(id), changes)?;
        applied
            .pop()
            .ok_or_else(|| ProductionError::WorkOrderNotFound { id: id.to_string() })
    }

    /// Orders not yet through their last step.
    pub fn active_orders(&self) -> Vec<WorkOrder> {
        self.orders
            .snapshot()
            .into_iter()
            .filter(|o| !o.is_finished())
            .collect()
    }

    /// Orders whose current step runs on the given machine type.
    pub fn at_machine(&self, machine_type_id: &str) -> Vec<WorkOrder> {
        self.orders
            .snapshot()
            .into_iter()
            .filter(|o| {
                o.current_step()
                    .and_then(|s| s.machine_type_id.as_deref())
                    .is_some_and(|m| m == machine_type_id)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::collection::tests::{collection, dead_api, live_api, stub_server};
    use crate::client::http::ApiClient;
    use std::time::Duration;
    use crate::domain::{MachineTypeConfig, StepStatus};

    async fn seed_machines(api: &ApiClient) {
        for (id, name) in [("mt-cut", "Cutting"), ("mt-sew", "Sewing"), ("mt-press", "Pressing")] {
            api.create(&MachineTypeConfig {
                id: id.into(),
                name: name.into(),
                stations: 2,
                color: None,
            })
            .await
            .unwrap();
        }
    }

    fn three_steps() -> Vec<PathStep> {
        vec![
            PathStep::machine("Cutting", "mt-cut"),
            PathStep::machine("Sewing", "mt-sew"),
            PathStep::machine("Pressing", "mt-press"),
        ]
    }

    #[tokio::test]
    async fn test_create_order_is_immediately_visible_and_synced() {
        let api = live_api().await;
        seed_machines(&api).await;
        let pipeline = Pipeline::new(collection(api.clone()));

        let order = pipeline
            .create_order("Polo shirts", "Polo", 100, three_steps())
            .unwrap();
        let local = pipeline.get(&order.id).unwrap();
        assert_eq!(local.current_step_index, -1);
        assert!(local.steps.iter().all(|s| s.status == StepStatus::Pending));

        pipeline.queue().wait_idle().await;
        assert_eq!(pipeline.get(&order.id).unwrap(), order);
        let remote = api.list::<WorkOrder>().await.unwrap();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].id, order.id);
        assert!(pipeline.notices().recent().is_empty());
    }

    #[tokio::test]
    async fn test_create_order_network_failure_removes_it_and_notifies() {
        let pipeline = Pipeline::new(collection(dead_api()));
        let mut notices = pipeline.notices().subscribe();

        let order = pipeline
            .create_order("Polo shirts", "Polo", 100, three_steps())
            .unwrap();
        assert!(pipeline.get(&order.id).is_some());

        pipeline.queue().wait_idle().await;
        assert!(pipeline.get(&order.id).is_none());
        let notice = notices.recv().await.unwrap();
        assert!(notice.message.contains(&order.id));
    }

    #[tokio::test]
    async fn test_progression_round_trip_against_server() {
        let api = live_api().await;
        seed_machines(&api).await;
        let pipeline = Pipeline::new(collection(api.clone()));
        let order = pipeline
            .create_order("Chinos", "Chino", 40, three_steps())
            .unwrap();
        pipeline.queue().wait_idle().await;

        // Writes to one record are awaited one by one; the queue itself
        // does not order concurrent requests.
        let id = order.id.as_str();
        pipeline.advance(id).unwrap();
        pipeline.queue().wait_idle().await;
        pipeline.record_progress(id, 25).unwrap();
        pipeline.queue().wait_idle().await;
        pipeline.hold(id).unwrap();
        pipeline.queue().wait_idle().await;
        pipeline.resume(id).unwrap();
        pipeline.queue().wait_idle().await;
        pipeline.advance(id).unwrap();
        pipeline.queue().wait_idle().await;
        let local = pipeline.retreat(id).unwrap();
        pipeline.queue().wait_idle().await;

        assert_eq!(local.current_step_index, 0);
        assert_eq!(local.steps[0].status, StepStatus::Running);
        let remote: Vec<WorkOrder> = api.list().await.unwrap();
        assert_eq!(remote[0].current_step_index, 0);
        assert_eq!(remote[0].steps[0].status, StepStatus::Running);
        assert_eq!(pipeline.queue().stats().failed, 0);
    }

    #[tokio::test]
    async fn test_invalid_progression_changes_nothing() {
        let pipeline = Pipeline::new(collection(dead_api()));
        let order = pipeline
            .create_order("Jackets", "Bomber", 10, three_steps())
            .unwrap();
        assert!(matches!(
            pipeline.retreat(&order.id),
            Err(ProductionError::NotStarted { .. })
        ));
        assert!(matches!(
            pipeline.advance("missing"),
            Err(ProductionError::RecordNotFound { .. })
        ));
        assert_eq!(pipeline.get(&order.id).unwrap().current_step_index, -1);
    }

    #[tokio::test]
    async fn test_split_hundred_into_two_thirties() {
        let api = live_api().await;
        seed_machines(&api).await;
        let pipeline = Pipeline::new(collection(api.clone()));
        let order = pipeline
            .create_order("Tees", "Crew tee", 100, three_steps())
            .unwrap();
        pipeline.queue().wait_idle().await;
        pipeline.advance(&order.id).unwrap();
        pipeline.queue().wait_idle().await;
        pipeline.advance(&order.id).unwrap();
        pipeline.queue().wait_idle().await;

        let split = pipeline.split(&order.id, &[30, 30]).unwrap();
        assert_eq!(split.len(), 3);
        let (remainder, children) = (&split[0], &split[1..]);
        assert_eq!(remainder.id, order.id);
        assert_eq!(remainder.quantity, 40);
        for child in children {
            assert_eq!(child.quantity, 30);
            assert_eq!(child.quantity_done, 0);
            assert_eq!(child.parent_id.as_deref(), Some(order.id.as_str()));
            assert_eq!(child.current_step_index, 1);
            let labels: Vec<&str> = child.steps.iter().map(|s| s.label.as_str()).collect();
            assert_eq!(labels, vec!["Cutting", "Sewing", "Pressing"]);
            assert_eq!(child.steps[0].status, StepStatus::Completed);
            assert_eq!(child.steps[1].status, StepStatus::Hold);
            assert_eq!(child.steps[2].status, StepStatus::Hold);
        }
        assert_eq!(pipeline.snapshot().len(), 3);

        pipeline.queue().wait_idle().await;
        let remote: Vec<WorkOrder> = api.list().await.unwrap();
        assert_eq!(remote.len(), 3);
        let total: u32 = remote.iter().map(|o| o.quantity).sum();
        assert_eq!(total, 100);
    }

    #[tokio::test]
    async fn test_failed_split_rolls_back_everything() {
        let pipeline = Pipeline::new(collection(dead_api()));
        let order = pipeline
            .create_order("Tees", "Crew tee", 100, three_steps())
            .unwrap();
        pipeline.queue().wait_idle().await;
        // Create failed too; seed the order locally to split it.
        pipeline.store().insert(order.clone());

        pipeline.split(&order.id, &[30, 30]).unwrap();
        assert_eq!(pipeline.snapshot().len(), 3);

        pipeline.queue().wait_idle().await;
        assert_eq!(pipeline.snapshot(), vec![order]);
    }

    #[tokio::test]
    async fn test_partially_synced_split_is_reverted_on_server() {
        use axum::Json;
        use axum::http::StatusCode;
        use axum::routing::{post, put};
        use std::sync::{Arc, Mutex};

        let puts = Arc::new(Mutex::new(Vec::new()));
        let recorded = puts.clone();
        let app = axum::Router::new()
            .route(
                "/api/work-orders",
                post(|| async {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(serde_json::json!({ "error": "disk full" })),
                    )
                }),
            )
            .route(
                "/api/work-orders/{id}",
                put(move |Json(order): Json<WorkOrder>| {
                    let recorded = recorded.clone();
                    async move {
                        recorded.lock().unwrap().push(order.quantity);
                        Json(order)
                    }
                }),
            );
        let api = ApiClient::new(&stub_server(app).await, Duration::from_secs(5)).unwrap();
        let pipeline = Pipeline::new(collection(api));
        let order = WorkOrder::new("Tees", "Crew tee", 100, three_steps()).unwrap();
        pipeline.store().insert(order.clone());

        pipeline.split(&order.id, &[30, 30]).unwrap();
        pipeline.queue().wait_idle().await;

        // The remainder PUT landed, the child POST failed, and the remainder
        // was put back to its full quantity.
        assert_eq!(*puts.lock().unwrap(), vec![40, 100]);
        assert_eq!(pipeline.snapshot(), vec![order]);
        let notices = pipeline.notices().recent();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].message.contains("disk full"), "{}", notices[0]);
    }

    #[tokio::test]
    async fn test_deleting_parent_unlinks_cached_children() {
        let api = live_api().await;
        seed_machines(&api).await;
        let pipeline = Pipeline::new(collection(api.clone()));
        let parent = pipeline
            .create_order("Hoodies", "Zip hoodie", 50, three_steps())
            .unwrap();
        pipeline.queue().wait_idle().await;
        let split = pipeline.split(&parent.id, &[20]).unwrap();
        let child_id = split[1].id.clone();
        pipeline.queue().wait_idle().await;

        let removed = pipeline.delete_order(&parent.id).unwrap();
        assert_eq!(removed.id, parent.id);
        assert!(pipeline.get(&child_id).unwrap().parent_id.is_none());
        pipeline.queue().wait_idle().await;

        pipeline
            .modify(&child_id, |o| {
                o.notes = "rush".into();
                Ok(())
            })
            .unwrap();
        pipeline.queue().wait_idle().await;

        assert!(pipeline.notices().recent().is_empty());
        let remote: Vec<WorkOrder> = api.list().await.unwrap();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].id, child_id);
        assert_eq!(remote[0].notes, "rush");
        assert!(remote[0].parent_id.is_none());
    }

    #[tokio::test]
    async fn test_failed_parent_delete_keeps_children_linked() {
        let pipeline = Pipeline::new(collection(dead_api()));
        let mut parent = WorkOrder::new("Hoodies", "Zip hoodie", 50, three_steps()).unwrap();
        let children = parent.split(&[20]).unwrap();
        pipeline.store().insert(parent.clone());
        pipeline.store().insert(children[0].clone());

        pipeline.delete_order(&parent.id).unwrap();
        assert_eq!(pipeline.snapshot().len(), 1);

        pipeline.queue().wait_idle().await;
        assert_eq!(pipeline.get(&parent.id).unwrap(), parent);
        let notices = pipeline.notices().recent();
        assert!(notices[0].message.contains(&format!("delete work order {}", parent.id)));
        assert_eq!(
            pipeline.get(&children[0].id).unwrap().parent_id.as_deref(),
            Some(parent.id.as_str())
        );
    }

    #[tokio::test]
    async fn test_at_machine_and_active_orders() {
        let pipeline = Pipeline::new(collection(dead_api()));
        let a = pipeline.create_order("A", "Tee", 5, three_steps()).unwrap();
        let b = pipeline.create_order("B", "Tee", 5, three_steps()).unwrap();
        pipeline.advance(&a.id).unwrap();
        pipeline.advance(&b.id).unwrap();
        pipeline.advance(&b.id).unwrap();

        let cutting: Vec<String> = pipeline.at_machine("mt-cut").into_iter().map(|o| o.id).collect();
        assert_eq!(cutting, vec![a.id.clone()]);
        assert_eq!(pipeline.at_machine("mt-sew")[0].id, b.id);
        assert_eq!(pipeline.active_orders().len(), 2);
    }
}
