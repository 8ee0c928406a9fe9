use std::collections::BTreeSet;

use kset_core::{Event, ObjMetadata, PruneEvent, PruneOperation, ON_REMOVE_ANNOTATION, ON_REMOVE_KEEP, OWNING_INVENTORY_ANNOTATION};
use kset_kubehub::{annotation, ClientError, ClusterClient, DeleteParams};
use metrics::counter;
use tracing::{debug, info, warn};

use crate::engine::{transport, Halt, TaskRunner};

/// Objects recorded by the previous run that are no longer desired.
pub fn prune_candidates(previous: &BTreeSet<ObjMetadata>, desired: &BTreeSet<ObjMetadata>) -> BTreeSet<ObjMetadata> {
    previous.difference(desired).cloned().collect()
}

impl<C: ClusterClient + ?Sized> TaskRunner<C> {
    /// Delete each candidate unless it is retained, gone, or owned elsewhere.
    /// Failures are recorded and reported; only transport errors halt.
    pub(crate) async fn prune(&mut self, candidates: &BTreeSet<ObjMetadata>, ensure_absent: &BTreeSet<ObjMetadata>) -> Result<(), Halt> {
        for id in candidates {
            let (operation, error) = self.prune_one(id, ensure_absent.contains(id)).await?;
            match operation {
                PruneOperation::Pruned => counter!("prune_ok", 1u64),
                PruneOperation::PruneSkipped => counter!("prune_skipped", 1u64),
                PruneOperation::PruneFailed => {
                    counter!("prune_err", 1u64);
                    self.prune_failed.insert(id.clone());
                }
            }
            self.emitter.emit(Event::pruned(id.clone(), operation, error)).await?;
        }
        self.emitter.emit(Event::Prune(PruneEvent::Completed)).await
    }

    async fn prune_one(&self, id: &ObjMetadata, ensure_absent: bool) -> Result<(PruneOperation, Option<String>), Halt> {
        let live = match self.emitter.guard(self.client.get(id)).await? {
            Ok(Some(live)) => live,
            Ok(None) => {
                debug!(object = %id, "already gone");
                return Ok((PruneOperation::PruneSkipped, None));
            }
            Err(e) if e.is_fatal() => return Err(transport(e)),
            Err(e) => return Ok((PruneOperation::PruneFailed, Some(e.to_string()))),
        };
        if annotation(&live, ON_REMOVE_ANNOTATION) == Some(ON_REMOVE_KEEP) {
            info!(object = %id, "retained by {}={}", ON_REMOVE_ANNOTATION, ON_REMOVE_KEEP);
            return Ok((PruneOperation::PruneSkipped, None));
        }
        if !ensure_absent {
            if let Some(owner) = annotation(&live, OWNING_INVENTORY_ANNOTATION) {
                if owner != self.inventory_id {
                    info!(object = %id, owner, "owned by another inventory; not pruning");
                    return Ok((PruneOperation::PruneSkipped, None));
                }
            }
        }
        if self.opts.dry_run.client_dry_run() {
            return Ok((PruneOperation::Pruned, None));
        }
        let params = DeleteParams { propagation: self.opts.propagation, dry_run: self.opts.dry_run.server_dry_run() };
        match self.emitter.guard(self.client.delete(id, &params)).await? {
            Ok(()) => Ok((PruneOperation::Pruned, None)),
            Err(ClientError::NotFound(_)) => Ok((PruneOperation::PruneSkipped, None)),
            Err(e) if e.is_fatal() => Err(transport(e)),
            Err(e) => {
                warn!(object = %id, error = %e, "prune failed");
                Ok((PruneOperation::PruneFailed, Some(e.to_string())))
            }
        }
    }
}
