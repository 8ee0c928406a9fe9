//! kset core types: object identity, the event taxonomy and run errors.
//!
//! Everything leaving a run travels as an [`Event`]; this crate holds the
//! vocabulary shared by the engine, the printers and the CLI.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

mod event;
mod object;

pub use event::{
    ApplyEvent, ApplyOperation, DeleteEvent, DeleteOperation, ErrorEvent, Event, EventType, InitEvent, PruneEvent,
    PruneOperation, ResourceStatus, StatusEvent,
};
pub use object::{ObjMetadata, ObjMetadataError};

/// Label carried by the inventory marker; its (trimmed, non-empty) value is the inventory id.
pub const INVENTORY_LABEL: &str = "kset.io/inventory-id";
/// Per-object annotation controlling what happens when the object leaves the desired set.
pub const ON_REMOVE_ANNOTATION: &str = "kset.io/on-remove";
/// Value of [`ON_REMOVE_ANNOTATION`] that keeps the object in the cluster.
pub const ON_REMOVE_KEEP: &str = "keep";
/// Per-object annotation declaring the desired presence of an object.
pub const PRESENCE_ANNOTATION: &str = "kset.io/presence";
/// Value of [`PRESENCE_ANNOTATION`]: never apply, always delete.
pub const ENSURE_DOES_NOT_EXIST: &str = "EnsureDoesNotExist";
/// Annotation stamped on applied objects naming the inventory id that owns them.
pub const OWNING_INVENTORY_ANNOTATION: &str = "kset.io/owning-inventory";

/// How mutating calls are issued for a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DryRunStrategy {
    /// Mutate the cluster.
    #[default]
    None,
    /// Issue no mutating calls at all.
    ClientOnly,
    /// Send mutating calls with the server dry-run flag.
    ServerSide,
}

impl DryRunStrategy {
    pub fn client_dry_run(self) -> bool { matches!(self, DryRunStrategy::ClientOnly) }
    pub fn server_dry_run(self) -> bool { matches!(self, DryRunStrategy::ServerSide) }
    /// True for either dry-run flavour.
    pub fn is_dry_run(self) -> bool { !matches!(self, DryRunStrategy::None) }

    /// Suffix appended to printed lines so previews can't be mistaken for real runs.
    pub fn preview_suffix(self) -> &'static str {
        match self {
            DryRunStrategy::None => "",
            DryRunStrategy::ClientOnly => " (preview)",
            DryRunStrategy::ServerSide => " (preview-server)",
        }
    }
}

/// Fatal errors of a run. Each one ends the event stream with a single
/// [`Event::Error`]; per-object failures are ordinary events instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum RunError {
    #[error("no inventory object found among the input objects")]
    NoInventoryObject,
    #[error("multiple inventory objects found: {}", display_ids(.candidates))]
    MultipleInventoryObjects { candidates: Vec<ObjMetadata> },
    #[error("duplicate object in desired set: {0}")]
    DuplicateObject(ObjMetadata),
    #[error("invalid object: {0}")]
    InvalidObject(String),
    #[error("inventory: {0}")]
    Inventory(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("run cancelled")]
    Cancelled,
    #[error("internal: {0}")]
    Internal(String),
}

fn display_ids(ids: &[ObjMetadata]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

pub mod prelude {
    pub use super::{
        ApplyEvent, ApplyOperation, DeleteEvent, DeleteOperation, DryRunStrategy, Event, ObjMetadata, PruneEvent,
        PruneOperation, ResourceStatus, RunError, StatusEvent,
    };
}
