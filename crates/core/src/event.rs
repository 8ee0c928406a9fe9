use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ObjMetadata, RunError};

/// A single progress record of a run.
///
/// Serialises as `{"type": "Apply", "subEvent": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "subEvent")]
pub enum Event {
    Init(InitEvent),
    Apply(ApplyEvent),
    Status(StatusEvent),
    Prune(PruneEvent),
    Delete(DeleteEvent),
    Error(ErrorEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType { Init, Apply, Status, Prune, Delete, Error }

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::Init(_) => EventType::Init,
            Event::Apply(_) => EventType::Apply,
            Event::Status(_) => EventType::Status,
            Event::Prune(_) => EventType::Prune,
            Event::Delete(_) => EventType::Delete,
            Event::Error(_) => EventType::Error,
        }
    }

    pub fn error(error: RunError) -> Self { Event::Error(ErrorEvent { error }) }

    pub fn applied(object: ObjMetadata, operation: ApplyOperation, error: Option<String>) -> Self {
        Event::Apply(ApplyEvent::ResourceUpdate { object, operation, error })
    }

    pub fn pruned(object: ObjMetadata, operation: PruneOperation, error: Option<String>) -> Self {
        Event::Prune(PruneEvent::ResourceUpdate { object, operation, error })
    }

    pub fn deleted(object: ObjMetadata, operation: DeleteOperation, error: Option<String>) -> Self {
        Event::Delete(DeleteEvent::ResourceUpdate { object, operation, error })
    }

    /// Object the event is about, if it is a per-object update.
    pub fn object(&self) -> Option<&ObjMetadata> {
        match self {
            Event::Apply(ApplyEvent::ResourceUpdate { object, .. })
            | Event::Prune(PruneEvent::ResourceUpdate { object, .. })
            | Event::Delete(DeleteEvent::ResourceUpdate { object, .. })
            | Event::Status(StatusEvent::ResourceUpdate { object, .. })
            | Event::Status(StatusEvent::Error { object, .. }) => Some(object),
            _ => None,
        }
    }
}

/// First event of every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitEvent {
    /// Identity of the inventory marker used for the run.
    pub inventory: ObjMetadata,
    /// Desired objects, in input order (empty for destroy).
    pub objects: Vec<ObjMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ApplyEvent {
    ResourceUpdate { object: ObjMetadata, operation: ApplyOperation, error: Option<String> },
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplyOperation { ServersideApplied, Created, Unchanged, Configured, Failed }

impl ApplyOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplyOperation::ServersideApplied => "ServersideApplied",
            ApplyOperation::Created => "Created",
            ApplyOperation::Unchanged => "Unchanged",
            ApplyOperation::Configured => "Configured",
            ApplyOperation::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PruneEvent {
    ResourceUpdate { object: ObjMetadata, operation: PruneOperation, error: Option<String> },
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PruneOperation { Pruned, PruneSkipped, PruneFailed }

impl PruneOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            PruneOperation::Pruned => "Pruned",
            PruneOperation::PruneSkipped => "PruneSkipped",
            PruneOperation::PruneFailed => "PruneFailed",
        }
    }

    /// The destroy vocabulary for the same outcome.
    pub fn to_delete(self) -> DeleteOperation {
        match self {
            PruneOperation::Pruned => DeleteOperation::Deleted,
            PruneOperation::PruneSkipped => DeleteOperation::DeleteSkipped,
            PruneOperation::PruneFailed => DeleteOperation::DeleteFailed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeleteEvent {
    ResourceUpdate { object: ObjMetadata, operation: DeleteOperation, error: Option<String> },
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeleteOperation { Deleted, DeleteSkipped, DeleteFailed }

impl DeleteOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            DeleteOperation::Deleted => "Deleted",
            DeleteOperation::DeleteSkipped => "DeleteSkipped",
            DeleteOperation::DeleteFailed => "DeleteFailed",
        }
    }
}

/// Convergence condition reported by a status evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceStatus { InProgress, Current, Failed, Unknown }

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceStatus::InProgress => "InProgress",
            ResourceStatus::Current => "Current",
            ResourceStatus::Failed => "Failed",
            ResourceStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StatusEvent {
    ResourceUpdate { object: ObjMetadata, status: ResourceStatus, message: String },
    Error { object: ObjMetadata, message: String },
    /// Every tracked object reached `Current`.
    Completed,
    /// The wait ended on timeout or cancellation.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub error: RunError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_has_type_and_sub_event() {
        let ev = Event::applied(ObjMetadata::new("", "ConfigMap", "default", "cm"), ApplyOperation::Created, None);
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "Apply");
        assert_eq!(v["subEvent"]["type"], "ResourceUpdate");
        assert_eq!(v["subEvent"]["operation"], "Created");
        assert_eq!(v["subEvent"]["object"]["name"], "cm");

        let done = serde_json::to_value(Event::Prune(PruneEvent::Completed)).unwrap();
        assert_eq!(done, serde_json::json!({ "type": "Prune", "subEvent": { "type": "Completed" } }));
    }

    #[test]
    fn error_event_serialises_run_error_kind() {
        let v = serde_json::to_value(Event::error(RunError::NoInventoryObject)).unwrap();
        assert_eq!(v["type"], "Error");
        assert_eq!(v["subEvent"]["error"]["kind"], "NoInventoryObject");
    }

    #[test]
    fn prune_operations_map_onto_delete_vocabulary() {
        assert_eq!(PruneOperation::Pruned.to_delete(), DeleteOperation::Deleted);
        assert_eq!(PruneOperation::PruneSkipped.to_delete(), DeleteOperation::DeleteSkipped);
        assert_eq!(PruneOperation::PruneFailed.to_delete(), DeleteOperation::DeleteFailed);
    }
}
