//! Invalidation events shared by the server's SSE endpoint and the client's
//! live-update subscription.
//!
//! An event is a bare tag. It never carries data: receivers re-fetch the
//! whole resource it names.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    PipelineUpdated,
    JobworksUpdated,
    MachineTypesUpdated,
    RestokUpdated,
    RoadmapsUpdated,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 5] = [
        ChangeKind::PipelineUpdated,
        ChangeKind::JobworksUpdated,
        ChangeKind::MachineTypesUpdated,
        ChangeKind::RestokUpdated,
        ChangeKind::RoadmapsUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PipelineUpdated => "pipeline_updated",
            Self::JobworksUpdated => "jobworks_updated",
            Self::MachineTypesUpdated => "machine_types_updated",
            Self::RestokUpdated => "restok_updated",
            Self::RoadmapsUpdated => "roadmaps_updated",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire form: `{"type":"pipeline_updated"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind) -> Self {
        Self { kind }
    }

    /// Parse the `data` payload of one SSE frame. Unknown tags and malformed
    /// JSON yield `None`.
    pub fn parse(data: &str) -> Option<Self> {
        serde_json::from_str(data.trim()).ok()
    }
}

impl From<ChangeKind> for ChangeEvent {
    fn from(kind: ChangeKind) -> Self {
        Self::new(kind)
    }
}
