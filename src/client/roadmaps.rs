//! Roadmap planner: roadmaps and their phases.

use std::ops::Deref;

use super::collection::Collection;
use crate::domain::{PhaseStatus, Roadmap, RoadmapPhase, new_id};
use crate::errors::ProductionError;

#[derive(Clone)]
pub struct Roadmaps {
    roadmaps: Collection<Roadmap>,
}

impl Deref for Roadmaps {
    type Target = Collection<Roadmap>;

    fn deref(&self) -> &Self::Target {
        &self.roadmaps
    }
}

impl Roadmaps {
    pub fn new(roadmaps: Collection<Roadmap>) -> Self {
        Self { roadmaps }
    }

    pub fn add_phase(&self, roadmap_id: &str, title: &str) -> Result<Roadmap, ProductionError> {
        self.roadmaps.modify(roadmap_id, |roadmap| {
            roadmap.phases.push(RoadmapPhase {
                id: new_id(),
                title: title.trim().to_string(),
                status: PhaseStatus::Todo,
            });
            Ok(())
        })
    }

    pub fn set_phase_status(
        &self,
        roadmap_id: &str,
        phase_id: &str,
        status: PhaseStatus,
    ) -> Result<Roadmap, ProductionError> {
        self.roadmaps.modify(roadmap_id, |roadmap| {
            let phase = roadmap
                .phases
                .iter_mut()
                .find(|p| p.id == phase_id)
                .ok_or_else(|| phase_not_found(phase_id))?;
            phase.status = status;
            Ok(())
        })
    }

    pub fn remove_phase(&self, roadmap_id: &str, phase_id: &str) -> Result<Roadmap, ProductionError> {
        self.roadmaps.modify(roadmap_id, |roadmap| {
            let index = roadmap
                .phases
                .iter()
                .position(|p| p.id == phase_id)
                .ok_or_else(|| phase_not_found(phase_id))?;
            roadmap.phases.remove(index);
            Ok(())
        })
    }
}

fn phase_not_found(id: &str) -> ProductionError {
    ProductionError::RecordNotFound {
        resource: "Roadmap phase",
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::collection::tests::{collection, dead_api, live_api};

    fn season() -> Roadmap {
        Roadmap {
            id: "rm-aw".into(),
            title: "Autumn/Winter".into(),
            phases: vec![],
            created_at: String::new(),
        }
    }

    #[tokio::test]
    async fn test_phase_lifecycle_syncs() {
        let api = live_api().await;
        let roadmaps = Roadmaps::new(collection(api.clone()));
        roadmaps.create(season()).unwrap();
        roadmaps.queue().wait_idle().await;

        let roadmap = roadmaps.add_phase("rm-aw", "Sampling").unwrap();
        roadmaps.queue().wait_idle().await;
        let phase_id = roadmap.phases[0].id.clone();

        let roadmap = roadmaps
            .set_phase_status("rm-aw", &phase_id, PhaseStatus::Done)
            .unwrap();
        assert!((roadmap.progress() - 1.0).abs() < f64::EPSILON);
        roadmaps.queue().wait_idle().await;

        let remote: Vec<Roadmap> = api.list().await.unwrap();
        assert_eq!(remote[0].phases[0].status, PhaseStatus::Done);

        roadmaps.remove_phase("rm-aw", &phase_id).unwrap();
        roadmaps.queue().wait_idle().await;
        let remote: Vec<Roadmap> = api.list().await.unwrap();
        assert!(remote[0].phases.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_phase_is_rejected_locally() {
        let roadmaps = Roadmaps::new(collection(dead_api()));
        roadmaps.store().insert(season());
        assert!(matches!(
            roadmaps.set_phase_status("rm-aw", "nope", PhaseStatus::InProgress),
            Err(ProductionError::RecordNotFound { resource: "Roadmap phase", .. })
        ));
        assert!(roadmaps.remove_phase("rm-aw", "nope").is_err());
        assert!(roadmaps.queue().is_idle());
    }
}
