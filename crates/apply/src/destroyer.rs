use std::collections::BTreeSet;
use std::sync::Arc;

use kset_core::{DeleteEvent, Event, InitEvent, PruneEvent, RunError};
use kset_inventory::{time_seeded_rng, InventoryClient, InventoryInfo};
use kset_kubehub::ClusterClient;
use kset_status::{ClientStatusReader, StatusReader};
use kube::core::DynamicObject;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::applier::inventory_halt;
use crate::engine::{solve_destroy, Emitter, Halt, TaskRunner};
use crate::options::{ApplyOptions, DestroyOptions};
use crate::stream::{spawn_run, EventStream};

/// Deletes every object recorded in an inventory, then the marker itself.
pub struct Destroyer<C: ClusterClient + ?Sized + 'static> {
    client: Arc<C>,
}

impl<C: ClusterClient + ?Sized + 'static> Destroyer<C> {
    pub fn new(client: Arc<C>) -> Self { Self { client } }

    pub fn run(&self, marker: DynamicObject, opts: DestroyOptions) -> EventStream {
        let client = self.client.clone();
        let status: Arc<dyn StatusReader> = Arc::new(ClientStatusReader::new(client.clone()));
        spawn_run(opts.queue_cap, move |tx, cancel, helpers| async move {
            let emitter = Emitter::new(tx, cancel);
            let res = destroy_run(client, status, marker, opts, &emitter, &helpers).await;
            emitter.finish(res).await;
        })
    }
}

/// Prune events in destroy vocabulary. `Prune::Completed` is dropped; the
/// destroyer emits its own `Delete::Completed` once the marker is handled.
pub fn relabel(ev: Event) -> Option<Event> {
    match ev {
        Event::Prune(PruneEvent::ResourceUpdate { object, operation, error }) => Some(Event::deleted(object, operation.to_delete(), error)),
        Event::Prune(PruneEvent::Completed) => None,
        other => Some(other),
    }
}

async fn destroy_run<C: ClusterClient + ?Sized>(
    client: Arc<C>,
    status: Arc<dyn StatusReader>,
    marker: DynamicObject,
    opts: DestroyOptions,
    emitter: &Emitter,
    helpers: &TaskTracker,
) -> Result<(), Halt> {
    let inventory = InventoryClient::new(client.clone()).with_dry_run(opts.dry_run);
    let mut rng = time_seeded_rng();
    let marker = emitter.guard(inventory.prepare(marker, &mut rng)).await?.map_err(inventory_halt)?;
    let info = InventoryInfo::from_object(&marker).map_err(inventory_halt)?;
    let previous = emitter.guard(inventory.load(&marker)).await?.map_err(inventory_halt)?;
    info!(inventory = %info.obj_metadata(), members = previous.len(), dry_run = ?opts.dry_run, "starting destroy");

    emitter.emit(Event::Init(InitEvent { inventory: info.obj_metadata(), objects: Vec::new() })).await?;

    let (tmp_tx, mut tmp_rx) = mpsc::channel::<Event>(opts.queue_cap.max(1));
    let tasks = solve_destroy(&previous);
    let mut runner = TaskRunner {
        client,
        inventory,
        status,
        marker,
        inventory_id: info.id,
        emitter: emitter.redirect(tmp_tx),
        opts: ApplyOptions { dry_run: opts.dry_run, propagation: opts.propagation, prune: true, ..ApplyOptions::default() },
        previous,
        desired: BTreeSet::new(),
        considered: BTreeSet::new(),
        applied: BTreeSet::new(),
        apply_failed: BTreeSet::new(),
        prune_failed: BTreeSet::new(),
    };
    let out = emitter.clone();
    let relabeller = helpers.spawn(async move {
        while let Some(ev) = tmp_rx.recv().await {
            if let Some(ev) = relabel(ev) { out.emit(ev).await?; }
        }
        Ok::<(), Halt>(())
    });
    let res = runner.run(tasks).await;
    // Closes the temp queue so the relabeller drains and exits
    drop(runner);
    match relabeller.await {
        Ok(forwarded) => forwarded?,
        Err(e) => return Err(Halt::Fatal(RunError::Internal(format!("relabel task failed: {e}")))),
    }
    res?;
    emitter.emit(Event::Delete(DeleteEvent::Completed)).await
}
