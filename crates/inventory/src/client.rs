use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use kset_core::{DryRunStrategy, ObjMetadata};
use kset_kubehub::{object_id, ApplyParams, ClientError, ClusterClient, DeleteParams};
use kube::core::DynamicObject;
use metrics::{counter, histogram};
use rand::Rng;
use tracing::{debug, info};

use crate::{decode_members, encode_members, fix_legacy_inventory_name, inventory_label, is_legacy_name, InventoryError, InventoryInfo};

/// Loads, stores and deletes inventory markers through a [`ClusterClient`].
pub struct InventoryClient<C: ClusterClient + ?Sized> {
    client: Arc<C>,
    dry_run: DryRunStrategy,
    field_manager: String,
}

impl<C: ClusterClient + ?Sized> InventoryClient<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client, dry_run: DryRunStrategy::None, field_manager: "kset".to_string() }
    }

    pub fn with_dry_run(mut self, dry_run: DryRunStrategy) -> Self { self.dry_run = dry_run; self }
    pub fn with_field_manager(mut self, field_manager: &str) -> Self { self.field_manager = field_manager.to_string(); self }

    /// Live markers carrying the same inventory id as `template`, in its namespace.
    pub async fn find_by_id(&self, template: &DynamicObject) -> Result<Option<DynamicObject>, InventoryError> {
        let info = InventoryInfo::from_object(template)?;
        let mut found = self.client.list("", "ConfigMap", &info.namespace, &info.selector()).await?;
        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            _ => Err(InventoryError::MultipleInventoryObjects { candidates: found.iter().filter_map(|o| object_id(o).ok()).collect() }),
        }
    }

    /// Settle the marker name for a run. A legacy-named template adopts the
    /// name of an existing live marker with the same id, or gets a fresh
    /// random suffix when none exists yet.
    pub async fn prepare<R: Rng + ?Sized + Send>(&self, mut template: DynamicObject, rng: &mut R) -> Result<DynamicObject, InventoryError> {
        InventoryInfo::from_object(&template)?;
        if !is_legacy_name(&template) { return Ok(template); }
        match self.find_by_id(&template).await? {
            Some(live) => {
                debug!(name = ?live.metadata.name, "adopting name of live inventory marker");
                template.metadata.name = live.metadata.name.clone();
            }
            None => { fix_legacy_inventory_name(&mut template, rng)?; }
        }
        Ok(template)
    }

    /// Members recorded by the live counterpart of `marker`; empty when it does not exist yet.
    pub async fn load(&self, marker: &DynamicObject) -> Result<BTreeSet<ObjMetadata>, InventoryError> {
        let info = InventoryInfo::from_object(marker)?;
        let Some(live) = self.client.get(&info.obj_metadata()).await? else {
            debug!(inventory = %info.obj_metadata(), "no live inventory marker; starting empty");
            return Ok(BTreeSet::new());
        };
        match inventory_label(&live) {
            Some(id) if id == info.id => decode_members(&live),
            other => Err(InventoryError::InvalidMarker(format!(
                "{} exists with inventory id {:?}, expected {:?}",
                info.obj_metadata(),
                other.unwrap_or_default(),
                info.id
            ))),
        }
    }

    /// Overwrite the member set with a single write. No-op for client dry-run.
    pub async fn store(&self, marker: &DynamicObject, members: &BTreeSet<ObjMetadata>) -> Result<(), InventoryError> {
        let t0 = Instant::now();
        let info = InventoryInfo::from_object(marker)?;
        if self.dry_run.client_dry_run() {
            debug!(inventory = %info.obj_metadata(), "client dry-run; inventory not stored");
            return Ok(());
        }
        let next = encode_members(marker, members);
        let params = ApplyParams {
            field_manager: self.field_manager.clone(),
            replace: true,
            dry_run: self.dry_run.server_dry_run(),
            ..ApplyParams::default()
        };
        self.client.apply(&next, &params).await?;
        histogram!("inventory_store_ms", t0.elapsed().as_secs_f64() * 1000.0);
        counter!("inventory_store_ok", 1u64);
        info!(inventory = %info.obj_metadata(), members = members.len(), "inventory stored");
        Ok(())
    }

    /// Delete the live marker. A missing marker counts as deleted.
    pub async fn delete(&self, marker: &DynamicObject) -> Result<(), InventoryError> {
        let info = InventoryInfo::from_object(marker)?;
        if self.dry_run.client_dry_run() { return Ok(()); }
        let params = DeleteParams { dry_run: self.dry_run.server_dry_run(), ..Default::default() };
        match self.client.delete(&info.obj_metadata(), &params).await {
            Ok(()) | Err(ClientError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
