//! kset inventory: the marker object that records set membership.
//!
//! A marker is a namespaced ConfigMap labelled with [`INVENTORY_LABEL`]. Its
//! `data` map holds one `<namespace>_<name>_<group>_<kind>: ""` entry per member.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use kset_core::{ObjMetadata, RunError, INVENTORY_LABEL};
use kset_kubehub::{label, object_id, ClientError};
use kube::core::{DynamicObject, TypeMeta};
use serde_json::{Map, Value as Json};

mod client;
mod name;

pub use client::InventoryClient;
pub use name::{add_suffix_to_name, fix_legacy_inventory_name, is_legacy_name, random_suffix, time_seeded_rng, LEGACY_INVENTORY_NAME};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InventoryError {
    #[error("no inventory object found")]
    NoInventoryObject,
    #[error("multiple inventory objects found ({})", .candidates.len())]
    MultipleInventoryObjects { candidates: Vec<ObjMetadata> },
    #[error("invalid inventory object: {0}")]
    InvalidMarker(String),
    #[error("inventory payload: {0}")]
    Payload(String),
    #[error("name suffix: {0}")]
    Suffix(String),
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl From<InventoryError> for RunError {
    fn from(e: InventoryError) -> Self {
        match e {
            InventoryError::NoInventoryObject => RunError::NoInventoryObject,
            InventoryError::MultipleInventoryObjects { candidates } => RunError::MultipleInventoryObjects { candidates },
            InventoryError::Client(ClientError::Transport(msg)) => RunError::Transport(msg),
            other => RunError::Inventory(other.to_string()),
        }
    }
}

/// Identity of a marker: where it lives and which inventory id it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryInfo {
    pub name: String,
    pub namespace: String,
    pub id: String,
}

impl InventoryInfo {
    pub fn from_object(obj: &DynamicObject) -> Result<Self, InventoryError> {
        let oid = object_id(obj).map_err(|e| InventoryError::InvalidMarker(e.to_string()))?;
        if !oid.group.is_empty() || oid.kind != "ConfigMap" {
            return Err(InventoryError::InvalidMarker(format!("{} is not a ConfigMap", oid)));
        }
        if oid.namespace.is_empty() {
            return Err(InventoryError::InvalidMarker(format!("{} has no namespace", oid)));
        }
        let id = inventory_label(obj).ok_or_else(|| InventoryError::InvalidMarker(format!("{} lacks label {}", oid, INVENTORY_LABEL)))?;
        Ok(Self { name: oid.name, namespace: oid.namespace, id })
    }

    pub fn obj_metadata(&self) -> ObjMetadata { ObjMetadata::new("", "ConfigMap", &self.namespace, &self.name) }

    /// Label selector matching every marker of this inventory.
    pub fn selector(&self) -> String { format!("{}={}", INVENTORY_LABEL, self.id) }
}

/// Trimmed value of the inventory label, when present and non-empty.
pub fn inventory_label(obj: &DynamicObject) -> Option<String> {
    label(obj, INVENTORY_LABEL).map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

pub fn is_inventory_object(obj: &DynamicObject) -> bool { inventory_label(obj).is_some() }

/// Separate the single marker from the resources of an input batch.
pub fn split_objects(objs: Vec<DynamicObject>) -> Result<(DynamicObject, Vec<DynamicObject>), InventoryError> {
    let (mut markers, resources): (Vec<_>, Vec<_>) = objs.into_iter().partition(is_inventory_object);
    match markers.len() {
        0 => Err(InventoryError::NoInventoryObject),
        1 => Ok((markers.remove(0), resources)),
        _ => Err(InventoryError::MultipleInventoryObjects {
            candidates: markers.iter().filter_map(|m| object_id(m).ok()).collect(),
        }),
    }
}

/// Members recorded in a live marker's payload.
pub fn decode_members(marker: &DynamicObject) -> Result<BTreeSet<ObjMetadata>, InventoryError> {
    let own = object_id(marker).ok();
    let mut out = BTreeSet::new();
    let Some(data) = marker.data.get("data") else { return Ok(out) };
    let map = data.as_object().ok_or_else(|| InventoryError::Payload("data is not a map".into()))?;
    for key in map.keys() {
        let id = ObjMetadata::from_inventory_key(key).map_err(|e| InventoryError::Payload(e.to_string()))?;
        if Some(&id) != own.as_ref() { out.insert(id); }
    }
    Ok(out)
}

/// The marker to write: `template` with its payload replaced by `members`.
pub fn encode_members(template: &DynamicObject, members: &BTreeSet<ObjMetadata>) -> DynamicObject {
    let own = object_id(template).ok();
    let mut marker = template.clone();
    marker.types = Some(TypeMeta { api_version: "v1".into(), kind: "ConfigMap".into() });
    marker.metadata.resource_version = None;
    marker.metadata.uid = None;
    marker.metadata.managed_fields = None;
    let payload: Map<String, Json> = members
        .iter()
        .filter(|id| Some(*id) != own.as_ref())
        .map(|id| (id.to_inventory_key(), Json::String(String::new())))
        .collect();
    if !marker.data.is_object() { marker.data = Json::Object(Map::new()); }
    if let Some(obj) = marker.data.as_object_mut() { obj.insert("data".into(), Json::Object(payload)); }
    marker
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn marker(name: &str, id: &str) -> DynamicObject {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": "default", "labels": { INVENTORY_LABEL: id } }
        }))
        .unwrap()
    }

    fn cm(name: &str) -> DynamicObject {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": "default" }
        }))
        .unwrap()
    }

    #[test]
    fn split_one_marker_and_resources() {
        let (inv, rest) = split_objects(vec![cm("a"), marker("inv", "id-1"), cm("b")]).unwrap();
        assert_eq!(inv.metadata.name.as_deref(), Some("inv"));
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn split_without_marker_fails() {
        assert_eq!(split_objects(vec![cm("a")]).unwrap_err(), InventoryError::NoInventoryObject);
    }

    #[test]
    fn split_with_two_markers_lists_both() {
        let err = split_objects(vec![marker("inv-a", "1"), cm("x"), marker("inv-b", "2")]).unwrap_err();
        match err {
            InventoryError::MultipleInventoryObjects { candidates } => {
                let names: Vec<_> = candidates.iter().map(|c| c.name.as_str()).collect();
                assert_eq!(names, vec!["inv-a", "inv-b"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn blank_label_is_not_a_marker() {
        assert!(!is_inventory_object(&marker("inv", "  ")));
        assert!(is_inventory_object(&marker("inv", " id ")));
        assert_eq!(inventory_label(&marker("inv", " id ")).as_deref(), Some("id"));
    }

    #[test]
    fn payload_never_contains_the_marker_itself() {
        let m = marker("inv", "id-1");
        let own = object_id(&m).unwrap();
        let members: BTreeSet<_> = [own.clone(), ObjMetadata::new("apps", "Deployment", "default", "web")].into_iter().collect();
        let encoded = encode_members(&m, &members);
        let decoded = decode_members(&encoded).unwrap();
        assert_eq!(decoded.len(), 1);
        assert!(!decoded.contains(&own));
        assert_eq!(encoded.data["data"]["default_web_apps_Deployment"], "");
    }

    #[test]
    fn malformed_payload_is_reported() {
        let mut m = marker("inv", "id-1");
        m.data = serde_json::json!({ "data": { "not-a-key": "" } });
        assert!(matches!(decode_members(&m), Err(InventoryError::Payload(_))));
    }

    #[test]
    fn info_requires_namespaced_configmap() {
        let info = InventoryInfo::from_object(&marker("inv", "id-1")).unwrap();
        assert_eq!(info.selector(), format!("{}=id-1", INVENTORY_LABEL));
        let mut cluster = marker("inv", "id-1");
        cluster.metadata.namespace = None;
        assert!(matches!(InventoryInfo::from_object(&cluster), Err(InventoryError::InvalidMarker(_))));
    }

    #[test]
    fn transport_errors_stay_fatal_transport() {
        let e: RunError = InventoryError::Client(ClientError::Transport("down".into())).into();
        assert_eq!(e, RunError::Transport("down".into()));
        let e: RunError = InventoryError::Payload("bad".into()).into();
        assert!(matches!(e, RunError::Inventory(_)));
    }
}
