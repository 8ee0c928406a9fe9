use std::collections::BTreeSet;
use std::sync::Arc;

use kset_core::{Event, InitEvent, ObjMetadata, RunError};
use kset_inventory::{split_objects, time_seeded_rng, InventoryClient, InventoryError, InventoryInfo};
use kset_kubehub::{object_id, ClusterClient};
use kset_status::{ClientStatusReader, StatusReader};
use kube::core::DynamicObject;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::engine::{solve_apply, Emitter, Halt, TaskRunner};
use crate::options::ApplyOptions;
use crate::stream::{spawn_run, EventStream};

/// Applies a desired object set, prunes what left it and records the result in the inventory marker.
pub struct Applier<C: ClusterClient + ?Sized + 'static> {
    client: Arc<C>,
    status: Arc<dyn StatusReader>,
    rng_seed: Option<u64>,
}

impl<C: ClusterClient + ?Sized + 'static> Applier<C> {
    pub fn new(client: Arc<C>) -> Self {
        let status: Arc<dyn StatusReader> = Arc::new(ClientStatusReader::new(client.clone()));
        Self { client, status, rng_seed: None }
    }

    pub fn with_status_reader(mut self, status: Arc<dyn StatusReader>) -> Self { self.status = status; self }

    /// Fixed seed for marker-name suffixes.
    pub fn with_rng_seed(mut self, seed: u64) -> Self { self.rng_seed = Some(seed); self }

    /// Start a run against the cluster. Events arrive in order on the returned stream,
    /// which closes when the run is over.
    pub fn run(&self, marker: DynamicObject, objects: Vec<DynamicObject>, opts: ApplyOptions) -> EventStream {
        let client = self.client.clone();
        let status = self.status.clone();
        let rng_seed = self.rng_seed;
        spawn_run(opts.queue_cap, move |tx, cancel, _| async move {
            let emitter = Emitter::new(tx, cancel);
            let res = apply_run(client, status, rng_seed, marker, objects, opts, &emitter).await;
            emitter.finish(res).await;
        })
    }

    /// Like [`Applier::run`], with the marker picked out of `objects`.
    pub fn run_objects(&self, objects: Vec<DynamicObject>, opts: ApplyOptions) -> EventStream {
        match split_objects(objects) {
            Ok((marker, rest)) => self.run(marker, rest, opts),
            Err(e) => spawn_run(1, move |tx, _, _| async move {
                let _ = tx.send(Event::error(e.into())).await;
            }),
        }
    }
}

/// Identities of `objects`, rejecting malformed and duplicate entries.
pub(crate) fn validate(marker: &ObjMetadata, objects: &[DynamicObject]) -> Result<Vec<ObjMetadata>, RunError> {
    let mut seen = BTreeSet::new();
    seen.insert(marker.clone());
    let mut ids = Vec::with_capacity(objects.len());
    for obj in objects {
        let id = object_id(obj).map_err(|e| RunError::InvalidObject(e.to_string()))?;
        if !seen.insert(id.clone()) { return Err(RunError::DuplicateObject(id)); }
        ids.push(id);
    }
    Ok(ids)
}

async fn apply_run<C: ClusterClient + ?Sized>(
    client: Arc<C>,
    status: Arc<dyn StatusReader>,
    rng_seed: Option<u64>,
    marker: DynamicObject,
    objects: Vec<DynamicObject>,
    opts: ApplyOptions,
    emitter: &Emitter,
) -> Result<(), Halt> {
    let inventory = InventoryClient::new(client.clone()).with_dry_run(opts.dry_run).with_field_manager(&opts.field_manager);
    let mut rng = match rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => time_seeded_rng(),
    };
    let marker = emitter.guard(inventory.prepare(marker, &mut rng)).await?.map_err(inventory_halt)?;
    let info = InventoryInfo::from_object(&marker).map_err(inventory_halt)?;
    let ids = validate(&info.obj_metadata(), &objects)?;
    let previous = emitter.guard(inventory.load(&marker)).await?.map_err(inventory_halt)?;
    info!(inventory = %info.obj_metadata(), objects = ids.len(), previous = previous.len(), dry_run = ?opts.dry_run, "starting apply");

    emitter.emit(Event::Init(InitEvent { inventory: info.obj_metadata(), objects: ids })).await?;

    let tasks = solve_apply(&previous, objects, &opts);
    let mut runner = TaskRunner {
        client,
        inventory,
        status,
        marker,
        inventory_id: info.id,
        emitter: emitter.clone(),
        opts,
        previous,
        desired: BTreeSet::new(),
        considered: BTreeSet::new(),
        applied: BTreeSet::new(),
        apply_failed: BTreeSet::new(),
        prune_failed: BTreeSet::new(),
    };
    runner.run(tasks).await
}

pub(crate) fn inventory_halt(e: InventoryError) -> Halt { Halt::Fatal(e.into()) }
