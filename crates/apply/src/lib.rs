//! kset apply: run an object set against a cluster as an ordered event stream.
//!
//! An apply run is `Init`, the apply phase, the prune phase, an inventory
//! write and (optionally) a status wait. A destroy run prunes every recorded
//! member and then removes the marker. Both report through [`EventStream`];
//! a fatal problem is always the last event.

#![forbid(unsafe_code)]

mod applier;
mod destroyer;
mod engine;
mod options;
mod prune;
mod stream;

pub use applier::Applier;
pub use destroyer::{relabel, Destroyer};
pub use options::{ApplyOptions, DestroyOptions, InventoryPolicy};
pub use prune::prune_candidates;
pub use stream::{CancelHandle, EventStream};
