//! Reference data: job-work vendors and machine types. Generic CRUD only.

use std::ops::Deref;

use super::collection::Collection;
use crate::domain::{JobWork, MachineTypeConfig};

#[derive(Clone)]
pub struct JobWorks {
    job_works: Collection<JobWork>,
}

impl Deref for JobWorks {
    type Target = Collection<JobWork>;

    fn deref(&self) -> &Self::Target {
        &self.job_works
    }
}

impl JobWorks {
    pub fn new(job_works: Collection<JobWork>) -> Self {
        Self { job_works }
    }
}

#[derive(Clone)]
pub struct MachineTypes {
    machine_types: Collection<MachineTypeConfig>,
}

impl Deref for MachineTypes {
    type Target = Collection<MachineTypeConfig>;

    fn deref(&self) -> &Self::Target {
        &self.machine_types
    }
}

impl MachineTypes {
    pub fn new(machine_types: Collection<MachineTypeConfig>) -> Self {
        Self { machine_types }
    }

    /// Total stations across every machine type.
    pub fn station_count(&self) -> u32 {
        self.machine_types
            .snapshot()
            .iter()
            .map(|m| m.stations)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::collection::tests::{collection, live_api};
    use crate::domain::{PathStep, WorkOrder};

    #[tokio::test]
    async fn test_referenced_machine_type_delete_rolls_back() {
        let api = live_api().await;
        let machines = MachineTypes::new(collection(api.clone()));
        machines
            .create(MachineTypeConfig {
                id: "mt-sew".into(),
                name: "Single needle".into(),
                stations: 4,
                color: Some("#3366ff".into()),
            })
            .unwrap();
        machines.queue().wait_idle().await;
        assert_eq!(machines.station_count(), 4);

        let order = WorkOrder::new(
            "Shirts",
            "Oxford",
            20,
            vec![PathStep::machine("Sewing", "mt-sew")],
        )
        .unwrap();
        api.create(&order).await.unwrap();

        let mut notices = machines.notices().subscribe();
        machines.delete("mt-sew").unwrap();
        assert_eq!(machines.snapshot().len(), 0);
        machines.queue().wait_idle().await;

        assert_eq!(machines.snapshot().len(), 1);
        let notice = notices.recv().await.unwrap();
        assert!(notice.message.contains("409"), "{}", notice);
    }

    #[tokio::test]
    async fn test_job_works_refresh_from_server() {
        let api = live_api().await;
        api.create(&JobWork {
            id: "jw-emb".into(),
            name: "Embroidery".into(),
            vendor: "Stitchcraft".into(),
            contact: "+91 98450 00000".into(),
            notes: String::new(),
        })
        .await
        .unwrap();

        let job_works = JobWorks::new(collection(api));
        assert!(job_works.refresh().await);
        assert_eq!(job_works.snapshot()[0].vendor, "Stitchcraft");
        assert!(job_works.store().is_loaded());
    }
}
