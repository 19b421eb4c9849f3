use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::events::ChangeKind;
use crate::errors::ProductionError;

/// Current time as an RFC 3339 string, the format every record timestamp uses.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Fresh client-side record id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ── Resources ────────────────────────────────────────────────────────

/// The five REST collections. Each maps to one route prefix and one
/// invalidation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    WorkOrders,
    JobWorks,
    MachineTypes,
    Items,
    Roadmaps,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::WorkOrders,
        Resource::JobWorks,
        Resource::MachineTypes,
        Resource::Items,
        Resource::Roadmaps,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Self::WorkOrders => "/api/work-orders",
            Self::JobWorks => "/api/job-works",
            Self::MachineTypes => "/api/machine-types",
            Self::Items => "/api/restok/items",
            Self::Roadmaps => "/api/roadmaps",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::WorkOrders => "Work order",
            Self::JobWorks => "Job work",
            Self::MachineTypes => "Machine type",
            Self::Items => "Item",
            Self::Roadmaps => "Roadmap",
        }
    }

    pub fn change_kind(&self) -> ChangeKind {
        match self {
            Self::WorkOrders => ChangeKind::PipelineUpdated,
            Self::JobWorks => ChangeKind::JobworksUpdated,
            Self::MachineTypes => ChangeKind::MachineTypesUpdated,
            Self::Items => ChangeKind::RestokUpdated,
            Self::Roadmaps => ChangeKind::RoadmapsUpdated,
        }
    }
}

/// A top-level record stored in one of the REST collections.
///
/// Nested sub-collections (path steps, sub-items, roadmap phases) are part of
/// the record and always travel with it.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const RESOURCE: Resource;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    /// Field-level checks applied by the server before persisting.
    fn validate(&self) -> Result<(), ProductionError>;

    /// Stamp `updatedAt` (or equivalent) before a write. No-op by default.
    fn touch(&mut self) {}
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), ProductionError> {
    if value.trim().is_empty() {
        return Err(ProductionError::validation(field, "must not be empty"));
    }
    Ok(())
}

// ── Work orders ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Machine,
    JobWork,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Hold,
    Completed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Hold => "hold",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "hold" => Ok(Self::Hold),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid step status: {}", s)),
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PathStep {
    pub id: String,
    pub kind: StepKind,
    pub label: String,
    #[serde(default)]
    pub machine_type_id: Option<String>,
    #[serde(default)]
    pub job_work_id: Option<String>,
    pub status: StepStatus,
    #[serde(default)]
    pub quantity_done: u32,
}

impl PathStep {
    pub fn machine(label: &str, machine_type_id: &str) -> Self {
        Self {
            id: new_id(),
            kind: StepKind::Machine,
            label: label.to_string(),
            machine_type_id: Some(machine_type_id.to_string()),
            job_work_id: None,
            status: StepStatus::Pending,
            quantity_done: 0,
        }
    }

    pub fn job_work(label: &str, job_work_id: &str) -> Self {
        Self {
            id: new_id(),
            kind: StepKind::JobWork,
            label: label.to_string(),
            machine_type_id: None,
            job_work_id: Some(job_work_id.to_string()),
            status: StepStatus::Pending,
            quantity_done: 0,
        }
    }
}

fn not_started() -> i32 {
    -1
}

/// A tracked production batch.
///
/// `current_step_index` is `-1` before the first step starts and equals
/// `steps.len()` once every step is completed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrder {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub product: String,
    pub quantity: u32,
    #[serde(default)]
    pub quantity_done: u32,
    #[serde(default = "not_started")]
    pub current_step_index: i32,
    pub steps: Vec<PathStep>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Record for WorkOrder {
    const RESOURCE: Resource = Resource::WorkOrders;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn validate(&self) -> Result<(), ProductionError> {
        require_non_empty("name", &self.name)?;
        if self.quantity == 0 {
            return Err(ProductionError::validation(
                "quantity",
                "must be greater than zero",
            ));
        }
        if self.steps.is_empty() {
            return Err(ProductionError::NoSteps {
                id: self.id.clone(),
            });
        }
        let len = self.steps.len() as i32;
        if self.current_step_index < -1 || self.current_step_index > len {
            return Err(ProductionError::validation(
                "currentStepIndex",
                format!("{} is outside -1..={}", self.current_step_index, len),
            ));
        }
        for step in &self.steps {
            require_non_empty("step label", &step.label)?;
            match step.kind {
                StepKind::Machine if step.machine_type_id.is_none() => {
                    return Err(ProductionError::validation(
                        "machineTypeId",
                        format!("machine step '{}' has no machine type", step.label),
                    ));
                }
                StepKind::JobWork if step.job_work_id.is_none() => {
                    return Err(ProductionError::validation(
                        "jobWorkId",
                        format!("job-work step '{}' has no job work", step.label),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn touch(&mut self) {
        let now = now_timestamp();
        if self.created_at.is_empty() {
            self.created_at = now.clone();
        }
        self.updated_at = now;
    }
}

// ── Restok ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub quantity: i64,
}

/// An inventory item. Sub-items are only ever written as part of the whole item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub min_quantity: i64,
    #[serde(default)]
    pub sub_items: Vec<SubItem>,
    #[serde(default)]
    pub updated_at: String,
}

impl Item {
    pub fn is_low_stock(&self) -> bool {
        self.quantity <= self.min_quantity
    }
}

impl Record for Item {
    const RESOURCE: Resource = Resource::Items;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn validate(&self) -> Result<(), ProductionError> {
        require_non_empty("name", &self.name)?;
        if self.quantity < 0 {
            return Err(ProductionError::validation("quantity", "must not be negative"));
        }
        if self.min_quantity < 0 {
            return Err(ProductionError::validation(
                "minQuantity",
                "must not be negative",
            ));
        }
        for sub in &self.sub_items {
            require_non_empty("sub-item name", &sub.name)?;
            if sub.quantity < 0 {
                return Err(ProductionError::validation(
                    "sub-item quantity",
                    format!("'{}' must not be negative", sub.name),
                ));
            }
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = now_timestamp();
    }
}

// ── Roadmaps ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Todo,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoadmapPhase {
    pub id: String,
    pub title: String,
    pub status: PhaseStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Roadmap {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub phases: Vec<RoadmapPhase>,
    #[serde(default)]
    pub created_at: String,
}

impl Roadmap {
    /// Fraction of phases marked done, in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        if self.phases.is_empty() {
            return 0.0;
        }
        let done = self
            .phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Done)
            .count();
        done as f64 / self.phases.len() as f64
    }
}

impl Record for Roadmap {
    const RESOURCE: Resource = Resource::Roadmaps;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn validate(&self) -> Result<(), ProductionError> {
        require_non_empty("title", &self.title)?;
        for phase in &self.phases {
            require_non_empty("phase title", &phase.title)?;
        }
        Ok(())
    }

    fn touch(&mut self) {
        if self.created_at.is_empty() {
            self.created_at = now_timestamp();
        }
    }
}

// ── Job works & machine types ────────────────────────────────────────

/// An outsourced processing stage (embroidery, dyeing, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobWork {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub notes: String,
}

impl Record for JobWork {
    const RESOURCE: Resource = Resource::JobWorks;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn validate(&self) -> Result<(), ProductionError> {
        require_non_empty("name", &self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineTypeConfig {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default = "default_stations")]
    pub stations: u32,
    #[serde(default)]
    pub color: Option<String>,
}

fn default_stations() -> u32 {
    1
}

impl Record for MachineTypeConfig {
    const RESOURCE: Resource = Resource::MachineTypes;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn validate(&self) -> Result<(), ProductionError> {
        require_non_empty("name", &self.name)?;
        if self.stations == 0 {
            return Err(ProductionError::validation("stations", "must be at least 1"));
        }
        Ok(())
    }
}
