//! kset kubehub: the cluster access seam.
//!
//! The engine only talks to a cluster through [`ClusterClient`]. Two
//! implementations ship here: [`KubeClient`] over kube-rs and
//! [`MemoryCluster`], an in-process fake used by tests and demos.

#![forbid(unsafe_code)]

use kset_core::{ObjMetadata, ObjMetadataError};
use kube::core::DynamicObject;
use serde_json::Value as Json;

mod kube_client;
mod memory;

pub use kube_client::KubeClient;
pub use memory::MemoryCluster;

/// Failure of a single client call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),
    /// The server does not support the requested mode (e.g. server-side apply).
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// The server refused this object; siblings are unaffected.
    #[error("{0}")]
    Rejected(String),
    /// The cluster could not be reached at all.
    #[error("transport: {0}")]
    Transport(String),
}

impl ClientError {
    /// Whether continuing the run is pointless after this error.
    pub fn is_fatal(&self) -> bool { matches!(self, ClientError::Transport(_)) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyParams {
    pub field_manager: String,
    /// Server-side apply; client-side merge otherwise.
    pub server_side: bool,
    /// Take ownership of conflicting fields (server-side apply only).
    pub force_conflicts: bool,
    /// Client-side only: overwrite an existing object whole instead of merging,
    /// so keys missing from `obj` are removed.
    pub replace: bool,
    pub dry_run: bool,
}

impl Default for ApplyParams {
    fn default() -> Self {
        Self { field_manager: "kset".to_string(), server_side: false, force_conflicts: false, replace: false, dry_run: false }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Propagation {
    Orphan,
    #[default]
    Background,
    Foreground,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteParams {
    pub propagation: Propagation,
    pub dry_run: bool,
}

/// Read / write access to remote objects.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    /// Live object, or `None` when it does not exist.
    async fn get(&self, id: &ObjMetadata) -> Result<Option<DynamicObject>, ClientError>;

    /// Objects of `group`/`kind` in `namespace` matching an equality label selector (`k=v,k2=v2`).
    async fn list(&self, group: &str, kind: &str, namespace: &str, label_selector: &str) -> Result<Vec<DynamicObject>, ClientError>;

    /// Upsert `obj`; returns the object as stored (or as it would be, under dry-run).
    async fn apply(&self, obj: &DynamicObject, params: &ApplyParams) -> Result<DynamicObject, ClientError>;

    /// Delete an object. A missing object yields [`ClientError::NotFound`].
    async fn delete(&self, id: &ObjMetadata, params: &DeleteParams) -> Result<(), ClientError>;
}

/// Identity of a manifest or live object.
pub fn object_id(obj: &DynamicObject) -> Result<ObjMetadata, ObjMetadataError> {
    let types = obj.types.as_ref().ok_or(ObjMetadataError::MissingKind)?;
    let name = obj.metadata.name.as_deref().ok_or(ObjMetadataError::MissingName)?;
    ObjMetadata::from_parts(&types.api_version, &types.kind, obj.metadata.namespace.as_deref(), name)
}

pub fn annotation<'a>(obj: &'a DynamicObject, key: &str) -> Option<&'a str> {
    obj.metadata.annotations.as_ref().and_then(|m| m.get(key)).map(|s| s.as_str())
}

pub fn label<'a>(obj: &'a DynamicObject, key: &str) -> Option<&'a str> {
    obj.metadata.labels.as_ref().and_then(|m| m.get(key)).map(|s| s.as_str())
}

pub fn set_annotation(obj: &mut DynamicObject, key: &str, value: &str) {
    obj.metadata.annotations.get_or_insert_with(Default::default).insert(key.to_string(), value.to_string());
}

/// Drop fields the server owns so two renditions of an object can be compared.
pub fn strip_server_fields(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
            obj.remove("resourceVersion");
            obj.remove("generation");
            obj.remove("creationTimestamp");
            obj.remove("uid");
        }
    }
    // Status is server-populated
    if let Some(obj) = v.as_object_mut() { obj.remove("status"); }
    v
}

/// True when both objects carry the same user-owned content.
pub fn same_content(a: &DynamicObject, b: &DynamicObject) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => strip_server_fields(a) == strip_server_fields(b),
        _ => false,
    }
}

/// Parse an equality-only label selector (`k=v,k2=v2`). Empty yields no terms.
pub(crate) fn parse_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .filter(|t| !t.trim().is_empty())
        .filter_map(|t| t.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cm(name: &str) -> DynamicObject {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": "default" },
            "data": { "k": "v" }
        }))
        .unwrap()
    }

    #[test]
    fn object_id_reads_types_and_metadata() {
        let id = object_id(&cm("a")).unwrap();
        assert_eq!(id, ObjMetadata::new("", "ConfigMap", "default", "a"));
        let mut untyped = cm("b");
        untyped.types = None;
        assert_eq!(object_id(&untyped), Err(ObjMetadataError::MissingKind));
    }

    #[test]
    fn same_content_ignores_server_fields() {
        let a = cm("a");
        let mut b = cm("a");
        b.metadata.resource_version = Some("42".into());
        b.metadata.uid = Some("u-1".into());
        assert!(same_content(&a, &b));
        b.data["data"]["k"] = Json::String("changed".into());
        assert!(!same_content(&a, &b));
    }

    #[test]
    fn selector_terms() {
        assert_eq!(parse_selector("a=b, c = d"), vec![("a".into(), "b".into()), ("c".into(), "d".into())]);
        assert!(parse_selector("").is_empty());
    }
}
