//! Task pipeline shared by the applier and the destroyer.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use kset_core::{ApplyEvent, ApplyOperation, Event, ObjMetadata, RunError, ENSURE_DOES_NOT_EXIST, OWNING_INVENTORY_ANNOTATION, PRESENCE_ANNOTATION};
use kset_inventory::InventoryClient;
use kset_kubehub::{annotation, object_id, same_content, set_annotation, ApplyParams, ClientError, ClusterClient};
use kset_status::{PollOptions, StatusReader};
use kube::core::DynamicObject;
use metrics::counter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::options::{ApplyOptions, InventoryPolicy};
use crate::prune::prune_candidates;

/// Why a run stopped early.
#[derive(Debug)]
pub(crate) enum Halt {
    /// Continuing is meaningless; reported as the final Error event.
    Fatal(RunError),
    /// Nobody is reading the stream any more.
    ConsumerGone,
}

impl From<RunError> for Halt {
    fn from(e: RunError) -> Self { Halt::Fatal(e) }
}

pub(crate) fn transport(e: ClientError) -> Halt {
    match e {
        ClientError::Transport(msg) => Halt::Fatal(RunError::Transport(msg)),
        other => Halt::Fatal(RunError::Transport(other.to_string())),
    }
}

/// Sending side of a run: the event queue plus its cancellation token.
#[derive(Clone)]
pub(crate) struct Emitter {
    tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
}

impl Emitter {
    pub(crate) fn new(tx: mpsc::Sender<Event>, cancel: CancellationToken) -> Self { Self { tx, cancel } }

    /// Same cancellation, different queue.
    pub(crate) fn redirect(&self, tx: mpsc::Sender<Event>) -> Self { Self { tx, cancel: self.cancel.clone() } }

    pub(crate) async fn emit(&self, ev: Event) -> Result<(), Halt> { self.tx.send(ev).await.map_err(|_| Halt::ConsumerGone) }

    /// Await `f` unless the run is cancelled or the consumer leaves first.
    pub(crate) async fn guard<F: Future>(&self, f: F) -> Result<F::Output, Halt> {
        if self.cancel.is_cancelled() { return Err(Halt::Fatal(RunError::Cancelled)); }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Halt::Fatal(RunError::Cancelled)),
            _ = self.tx.closed() => Err(Halt::ConsumerGone),
            out = f => Ok(out),
        }
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken { &self.cancel }

    /// Close out a run: a fatal halt becomes the last event.
    pub(crate) async fn finish(&self, res: Result<(), Halt>) {
        match res {
            Ok(()) => debug!("run completed"),
            Err(Halt::ConsumerGone) => debug!("event consumer went away; run stopped"),
            Err(Halt::Fatal(e)) => {
                warn!(error = %e, "run failed");
                let _ = self.tx.send(Event::error(e)).await;
            }
        }
    }
}

pub(crate) enum Task {
    Apply(Vec<DynamicObject>),
    Prune { candidates: BTreeSet<ObjMetadata>, ensure_absent: BTreeSet<ObjMetadata> },
    SaveInventory,
    DeleteInventory,
    Wait(PollOptions),
}

impl Task {
    fn name(&self) -> &'static str {
        match self {
            Task::Apply(_) => "apply",
            Task::Prune { .. } => "prune",
            Task::SaveInventory => "save-inventory",
            Task::DeleteInventory => "delete-inventory",
            Task::Wait(_) => "wait",
        }
    }
}

pub(crate) fn is_ensure_absent(obj: &DynamicObject) -> bool {
    annotation(obj, PRESENCE_ANNOTATION) == Some(ENSURE_DOES_NOT_EXIST)
}

/// Task queue for an apply run: apply, prune, persist the inventory, then optionally wait.
pub(crate) fn solve_apply(previous: &BTreeSet<ObjMetadata>, objects: Vec<DynamicObject>, opts: &ApplyOptions) -> Vec<Task> {
    let (absent, apply): (Vec<_>, Vec<_>) = objects.into_iter().partition(is_ensure_absent);
    let desired: BTreeSet<ObjMetadata> = apply.iter().filter_map(|o| object_id(o).ok()).collect();
    let ensure_absent: BTreeSet<ObjMetadata> = absent.iter().filter_map(|o| object_id(o).ok()).collect();
    let mut candidates = if opts.prune { prune_candidates(previous, &desired) } else { BTreeSet::new() };
    candidates.extend(ensure_absent.iter().cloned());

    let mut tasks = vec![Task::Apply(apply), Task::Prune { candidates, ensure_absent }, Task::SaveInventory];
    if let Some(timeout) = opts.reconcile_timeout {
        if !opts.dry_run.is_dry_run() {
            tasks.push(Task::Wait(PollOptions { interval: opts.poll_interval, timeout: Some(timeout) }));
        }
    }
    tasks
}

/// Task queue for a destroy run: every recorded member is a prune candidate.
pub(crate) fn solve_destroy(previous: &BTreeSet<ObjMetadata>) -> Vec<Task> {
    vec![Task::Prune { candidates: previous.clone(), ensure_absent: BTreeSet::new() }, Task::DeleteInventory]
}

/// Executes a task queue and keeps the per-run bookkeeping that decides the next inventory.
pub(crate) struct TaskRunner<C: ClusterClient + ?Sized> {
    pub(crate) client: Arc<C>,
    pub(crate) inventory: InventoryClient<C>,
    pub(crate) status: Arc<dyn StatusReader>,
    pub(crate) marker: DynamicObject,
    pub(crate) inventory_id: String,
    pub(crate) emitter: Emitter,
    pub(crate) opts: ApplyOptions,
    pub(crate) previous: BTreeSet<ObjMetadata>,
    pub(crate) desired: BTreeSet<ObjMetadata>,
    pub(crate) considered: BTreeSet<ObjMetadata>,
    pub(crate) applied: BTreeSet<ObjMetadata>,
    pub(crate) apply_failed: BTreeSet<ObjMetadata>,
    pub(crate) prune_failed: BTreeSet<ObjMetadata>,
}

impl<C: ClusterClient + ?Sized> TaskRunner<C> {
    pub(crate) async fn run(&mut self, tasks: Vec<Task>) -> Result<(), Halt> {
        for task in tasks {
            debug!(task = task.name(), "running task");
            match task {
                Task::Apply(objects) => self.apply_all(objects).await?,
                Task::Prune { candidates, ensure_absent } => {
                    self.considered.extend(candidates.iter().cloned());
                    self.prune(&candidates, &ensure_absent).await?;
                }
                Task::SaveInventory => self.save_inventory().await?,
                Task::DeleteInventory => self.delete_inventory().await,
                Task::Wait(opts) => self.wait(opts).await?,
            }
        }
        Ok(())
    }

    async fn apply_all(&mut self, objects: Vec<DynamicObject>) -> Result<(), Halt> {
        for obj in objects {
            let Ok(id) = object_id(&obj) else { continue };
            self.desired.insert(id.clone());
            let (operation, error) = match self.apply_one(&id, obj).await? {
                Ok(op) => {
                    counter!("apply_ok", 1u64);
                    self.applied.insert(id.clone());
                    (op, None)
                }
                Err(msg) => {
                    counter!("apply_err", 1u64);
                    warn!(object = %id, error = %msg, "apply failed");
                    self.apply_failed.insert(id.clone());
                    (ApplyOperation::Failed, Some(msg))
                }
            };
            self.emitter.emit(Event::applied(id, operation, error)).await?;
        }
        self.emitter.emit(Event::Apply(ApplyEvent::Completed)).await
    }

    /// Outer error halts the run; inner error is a per-object failure.
    async fn apply_one(&self, id: &ObjMetadata, mut obj: DynamicObject) -> Result<Result<ApplyOperation, String>, Halt> {
        let before = match self.emitter.guard(self.client.get(id)).await? {
            Ok(b) => b,
            Err(e) if e.is_fatal() => return Err(transport(e)),
            Err(e) => return Ok(Err(e.to_string())),
        };
        if let Some(live) = &before {
            let owner = annotation(live, OWNING_INVENTORY_ANNOTATION);
            let allowed = match (self.opts.inventory_policy, owner) {
                (_, Some(o)) if o == self.inventory_id => true,
                (InventoryPolicy::AdoptAll, _) => true,
                (InventoryPolicy::AdoptIfNoInventory, None) => true,
                _ => false,
            };
            if !allowed {
                return Ok(Err(format!("{} is not owned by inventory {:?} (owner: {:?})", id, self.inventory_id, owner.unwrap_or(""))));
            }
        }
        set_annotation(&mut obj, OWNING_INVENTORY_ANNOTATION, &self.inventory_id);

        if self.opts.dry_run.client_dry_run() {
            return Ok(Ok(classify(before.as_ref(), &obj, false)));
        }
        let mut params = ApplyParams {
            field_manager: self.opts.field_manager.clone(),
            server_side: self.opts.server_side,
            force_conflicts: self.opts.force_conflicts,
            replace: false,
            dry_run: self.opts.dry_run.server_dry_run(),
        };
        let mut result = self.emitter.guard(self.client.apply(&obj, &params)).await?;
        if params.server_side && matches!(result, Err(ClientError::Unsupported(_))) {
            info!(object = %id, "server-side apply unsupported; falling back to client-side merge");
            params.server_side = false;
            result = self.emitter.guard(self.client.apply(&obj, &params)).await?;
        }
        match result {
            Ok(after) => Ok(Ok(classify(before.as_ref(), &after, params.server_side))),
            Err(e) if e.is_fatal() => Err(transport(e)),
            Err(e) => Ok(Err(e.to_string())),
        }
    }

    async fn save_inventory(&mut self) -> Result<(), Halt> {
        let mut next: BTreeSet<ObjMetadata> = self.applied.clone();
        next.extend(self.previous.intersection(&self.apply_failed).cloned());
        next.extend(self.prune_failed.iter().cloned());
        // Members no task looked at stay tracked
        next.extend(self.previous.iter().filter(|id| !self.desired.contains(*id) && !self.considered.contains(*id)).cloned());
        self.emitter.guard(self.inventory.store(&self.marker, &next)).await?.map_err(|e| Halt::Fatal(e.into()))
    }

    /// Best-effort: a failure is logged and otherwise ignored.
    async fn delete_inventory(&self) {
        if let Err(e) = self.inventory.delete(&self.marker).await {
            warn!(error = %e, "failed to delete inventory marker");
        }
    }

    async fn wait(&self, opts: PollOptions) -> Result<(), Halt> {
        let ids: Vec<ObjMetadata> = self.applied.iter().cloned().collect();
        let token = self.emitter.cancel_token().child_token();
        let mut rx = kset_status::poll(self.status.clone(), ids, opts, token.clone());
        // The poller always ends with Completed or Aborted before closing
        let res = async {
            while let Some(ev) = rx.recv().await {
                self.emitter.emit(Event::Status(ev)).await?;
            }
            Ok::<(), Halt>(())
        }
        .await;
        token.cancel();
        res
    }
}

/// Apply outcome from the object before and after the write.
pub(crate) fn classify(before: Option<&DynamicObject>, after: &DynamicObject, server_side: bool) -> ApplyOperation {
    match before {
        None => ApplyOperation::Created,
        Some(b) if same_content(b, after) => ApplyOperation::Unchanged,
        Some(_) if server_side => ApplyOperation::ServersideApplied,
        Some(_) => ApplyOperation::Configured,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kset_core::DryRunStrategy;
    use std::time::Duration;

    fn cm(name: &str, annos: serde_json::Value) -> DynamicObject {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": "default", "annotations": annos }
        }))
        .unwrap()
    }

    fn id(name: &str) -> ObjMetadata { ObjMetadata::new("", "ConfigMap", "default", name) }

    #[test]
    fn apply_queue_orders_apply_prune_save() {
        let previous: BTreeSet<_> = [id("a"), id("gone")].into_iter().collect();
        let tasks = solve_apply(&previous, vec![cm("a", serde_json::json!({}))], &ApplyOptions::default());
        let names: Vec<_> = tasks.iter().map(Task::name).collect();
        assert_eq!(names, vec!["apply", "prune", "save-inventory"]);
        match &tasks[1] {
            Task::Prune { candidates, .. } => assert_eq!(candidates.iter().collect::<Vec<_>>(), vec![&id("gone")]),
            _ => unreachable!(),
        }
    }

    #[test]
    fn ensure_absent_objects_are_pruned_not_applied() {
        let objs = vec![cm("keep", serde_json::json!({})), cm("drop", serde_json::json!({ PRESENCE_ANNOTATION: ENSURE_DOES_NOT_EXIST }))];
        let opts = ApplyOptions { prune: false, ..Default::default() };
        let tasks = solve_apply(&BTreeSet::new(), objs, &opts);
        match (&tasks[0], &tasks[1]) {
            (Task::Apply(apply), Task::Prune { candidates, ensure_absent }) => {
                assert_eq!(apply.len(), 1);
                assert!(candidates.contains(&id("drop")));
                assert!(ensure_absent.contains(&id("drop")));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn wait_only_when_requested_and_not_previewing() {
        let opts = ApplyOptions { reconcile_timeout: Some(Duration::from_secs(5)), ..Default::default() };
        assert_eq!(solve_apply(&BTreeSet::new(), vec![], &opts).len(), 4);
        let preview = ApplyOptions { dry_run: DryRunStrategy::ClientOnly, ..opts };
        assert_eq!(solve_apply(&BTreeSet::new(), vec![], &preview).len(), 3);
    }

    #[test]
    fn destroy_queue_prunes_everything_then_drops_marker() {
        let previous: BTreeSet<_> = [id("a"), id("b")].into_iter().collect();
        let tasks = solve_destroy(&previous);
        assert_eq!(tasks.iter().map(Task::name).collect::<Vec<_>>(), vec!["prune", "delete-inventory"]);
    }

    #[test]
    fn classification() {
        let a = cm("a", serde_json::json!({}));
        let mut b = a.clone();
        b.data = serde_json::json!({ "data": { "k": "v" } });
        assert_eq!(classify(None, &a, false), ApplyOperation::Created);
        assert_eq!(classify(Some(&a), &a, true), ApplyOperation::Unchanged);
        assert_eq!(classify(Some(&a), &b, false), ApplyOperation::Configured);
        assert_eq!(classify(Some(&a), &b, true), ApplyOperation::ServersideApplied);
    }
}
