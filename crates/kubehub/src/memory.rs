use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use kset_core::ObjMetadata;
use kube::core::DynamicObject;
use serde_json::Value as Json;
use tracing::debug;

use crate::{label, object_id, parse_selector, same_content, ApplyParams, ClientError, ClusterClient, DeleteParams};

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjMetadata, DynamicObject>,
    next_rv: u64,
    reject_apply: BTreeMap<ObjMetadata, String>,
    reject_delete: BTreeMap<ObjMetadata, String>,
    offline: bool,
    ssa_unsupported: bool,
    mutations: u64,
    deletes: Vec<ObjMetadata>,
}

/// In-process cluster: a map of live objects with server-ish behaviour
/// (uids, resource versions bumped only on real changes) and failure injection.
#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<State>,
}

impl MemoryCluster {
    pub fn new() -> Self { Self::default() }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Place an object directly, bypassing apply semantics.
    pub fn insert(&self, mut obj: DynamicObject) -> Result<(), ClientError> {
        let id = object_id(&obj).map_err(|e| ClientError::Rejected(e.to_string()))?;
        let mut st = self.state();
        st.next_rv += 1;
        obj.metadata.resource_version = Some(st.next_rv.to_string());
        obj.metadata.uid.get_or_insert_with(|| uuid::Uuid::new_v4().to_string());
        st.objects.insert(id, obj);
        Ok(())
    }

    pub fn object(&self, id: &ObjMetadata) -> Option<DynamicObject> { self.state().objects.get(id).cloned() }
    pub fn contains(&self, id: &ObjMetadata) -> bool { self.state().objects.contains_key(id) }
    pub fn ids(&self) -> BTreeSet<ObjMetadata> { self.state().objects.keys().cloned().collect() }
    /// Number of successful, non-dry-run writes and deletes.
    pub fn mutations(&self) -> u64 { self.state().mutations }
    /// Objects deleted so far, in deletion order.
    pub fn deleted(&self) -> Vec<ObjMetadata> { self.state().deletes.clone() }

    /// Make every apply of `id` fail with `message`.
    pub fn reject_apply(&self, id: ObjMetadata, message: &str) { self.state().reject_apply.insert(id, message.to_string()); }
    /// Make every delete of `id` fail with `message`.
    pub fn reject_delete(&self, id: ObjMetadata, message: &str) { self.state().reject_delete.insert(id, message.to_string()); }
    /// Simulate a connectivity loss: every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) { self.state().offline = offline; }
    /// Answer server-side apply with `Unsupported`, forcing the client-side fallback.
    pub fn set_ssa_unsupported(&self, on: bool) { self.state().ssa_unsupported = on; }

    fn check_online(st: &State) -> Result<(), ClientError> {
        if st.offline { Err(ClientError::Transport("connection refused".into())) } else { Ok(()) }
    }
}

#[async_trait::async_trait]
impl ClusterClient for MemoryCluster {
    async fn get(&self, id: &ObjMetadata) -> Result<Option<DynamicObject>, ClientError> {
        let st = self.state();
        Self::check_online(&st)?;
        Ok(st.objects.get(id).cloned())
    }

    async fn list(&self, group: &str, kind: &str, namespace: &str, label_selector: &str) -> Result<Vec<DynamicObject>, ClientError> {
        let st = self.state();
        Self::check_online(&st)?;
        let terms = parse_selector(label_selector);
        Ok(st
            .objects
            .iter()
            .filter(|(id, _)| id.group == group && id.kind == kind && id.namespace == namespace)
            .filter(|(_, o)| terms.iter().all(|(k, v)| label(o, k) == Some(v.as_str())))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn apply(&self, obj: &DynamicObject, params: &ApplyParams) -> Result<DynamicObject, ClientError> {
        let id = object_id(obj).map_err(|e| ClientError::Rejected(e.to_string()))?;
        let mut st = self.state();
        Self::check_online(&st)?;
        if params.server_side && st.ssa_unsupported {
            return Err(ClientError::Unsupported("server-side apply is not supported".into()));
        }
        if let Some(msg) = st.reject_apply.get(&id) { return Err(ClientError::Rejected(msg.clone())); }

        let mut next = match st.objects.get(&id) {
            Some(live) if !params.server_side && !params.replace => merged(live, obj)?,
            _ => obj.clone(),
        };
        match st.objects.get(&id) {
            Some(live) => {
                next.metadata.uid = live.metadata.uid.clone();
                next.metadata.resource_version = live.metadata.resource_version.clone();
                if let Some(status) = live.data.get("status") {
                    if let Some(map) = next.data.as_object_mut() { map.insert("status".into(), status.clone()); }
                }
                if same_content(live, &next) { return Ok(live.clone()); }
            }
            None => { next.metadata.uid = Some(uuid::Uuid::new_v4().to_string()); }
        }
        if params.dry_run { return Ok(next); }
        st.next_rv += 1;
        next.metadata.resource_version = Some(st.next_rv.to_string());
        st.mutations += 1;
        debug!(object = %id, rv = st.next_rv, "memory cluster stored object");
        st.objects.insert(id, next.clone());
        Ok(next)
    }

    async fn delete(&self, id: &ObjMetadata, params: &DeleteParams) -> Result<(), ClientError> {
        let mut st = self.state();
        Self::check_online(&st)?;
        if let Some(msg) = st.reject_delete.get(id) { return Err(ClientError::Rejected(msg.clone())); }
        if !st.objects.contains_key(id) { return Err(ClientError::NotFound(id.to_string())); }
        if params.dry_run { return Ok(()); }
        st.objects.remove(id);
        st.mutations += 1;
        st.deletes.push(id.clone());
        Ok(())
    }
}

/// `patch` merged onto `live` the way a JSON merge patch is: keys the patch
/// leaves out survive, nulls delete.
fn merged(live: &DynamicObject, patch: &DynamicObject) -> Result<DynamicObject, ClientError> {
    let mut doc = serde_json::to_value(live).map_err(|e| ClientError::Rejected(e.to_string()))?;
    let patch = serde_json::to_value(patch).map_err(|e| ClientError::Rejected(e.to_string()))?;
    merge_patch(&mut doc, &patch);
    serde_json::from_value(doc).map_err(|e| ClientError::Rejected(e.to_string()))
}

fn merge_patch(target: &mut Json, patch: &Json) {
    let Some(patch) = patch.as_object() else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() { *target = Json::Object(Default::default()); }
    if let Some(map) = target.as_object_mut() {
        for (k, v) in patch {
            if v.is_null() {
                map.remove(k);
            } else {
                merge_patch(map.entry(k.clone()).or_insert(Json::Null), v);
            }
        }
    }
}
