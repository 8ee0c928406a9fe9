use std::fmt;

use serde::{Deserialize, Serialize};

const KEY_SEPARATOR: char = '_';

/// Identity of a remote object: `(group, kind, namespace, name)`.
///
/// Cluster-scoped objects carry an empty namespace and core-group kinds an
/// empty group. Ordering is structural, field by field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjMetadata {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjMetadataError {
    #[error("object is missing kind")]
    MissingKind,
    #[error("object is missing metadata.name")]
    MissingName,
    #[error("malformed inventory key: {0:?}")]
    MalformedKey(String),
}

impl ObjMetadata {
    pub fn new(group: &str, kind: &str, namespace: &str, name: &str) -> Self {
        Self { group: group.to_string(), kind: kind.to_string(), namespace: namespace.to_string(), name: name.to_string() }
    }

    /// Build an identity from manifest fields. `api_version` is `group/version`
    /// or a bare `version` for the core group.
    pub fn from_parts(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Result<Self, ObjMetadataError> {
        if kind.trim().is_empty() { return Err(ObjMetadataError::MissingKind); }
        if name.trim().is_empty() { return Err(ObjMetadataError::MissingName); }
        let group = api_version.split_once('/').map(|(g, _)| g).unwrap_or("");
        Ok(Self::new(group, kind, namespace.unwrap_or(""), name))
    }

    /// `Kind` for the core group, `Kind.group` otherwise.
    pub fn group_kind(&self) -> String {
        if self.group.is_empty() { self.kind.clone() } else { format!("{}.{}", self.kind, self.group) }
    }

    /// Key under which the identity is stored in an inventory payload:
    /// `<namespace>_<name>_<group>_<kind>`.
    pub fn to_inventory_key(&self) -> String {
        format!("{ns}{s}{name}{s}{group}{s}{kind}", ns = self.namespace, name = self.name, group = self.group, kind = self.kind, s = KEY_SEPARATOR)
    }

    pub fn from_inventory_key(key: &str) -> Result<Self, ObjMetadataError> {
        let parts: Vec<&str> = key.trim().split(KEY_SEPARATOR).collect();
        match parts.as_slice() {
            [ns, name, group, kind] if !name.is_empty() && !kind.is_empty() => Ok(Self::new(group, kind, ns, name)),
            _ => Err(ObjMetadataError::MalformedKey(key.to_string())),
        }
    }
}

impl fmt::Display for ObjMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.group_kind(), self.name)
        } else {
            write!(f, "{}/{}/{}", self.group_kind(), self.namespace, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_is_taken_from_api_version() {
        let core = ObjMetadata::from_parts("v1", "ConfigMap", Some("default"), "cm").unwrap();
        assert_eq!(core.group, "");
        assert_eq!(core.group_kind(), "ConfigMap");
        let apps = ObjMetadata::from_parts("apps/v1", "Deployment", Some("default"), "web").unwrap();
        assert_eq!(apps.group, "apps");
        assert_eq!(apps.group_kind(), "Deployment.apps");
    }

    #[test]
    fn missing_fields_are_rejected() {
        assert_eq!(ObjMetadata::from_parts("v1", "", None, "x"), Err(ObjMetadataError::MissingKind));
        assert_eq!(ObjMetadata::from_parts("v1", "ConfigMap", None, " "), Err(ObjMetadataError::MissingName));
    }

    #[test]
    fn inventory_key_round_trips_cluster_scoped_and_core() {
        let ids = [
            ObjMetadata::new("", "ConfigMap", "default", "cm"),
            ObjMetadata::new("apiextensions.k8s.io", "CustomResourceDefinition", "", "foos.example.io"),
        ];
        for id in ids {
            let key = id.to_inventory_key();
            assert_eq!(ObjMetadata::from_inventory_key(&key).unwrap(), id, "key={}", key);
        }
        assert_eq!(ObjMetadata::new("", "ConfigMap", "default", "cm").to_inventory_key(), "default_cm__ConfigMap");
    }

    #[test]
    fn malformed_inventory_keys_are_errors() {
        for key in ["", "a_b_c", "a_b_c_d_e", "ns__g_Kind", "ns_name_g_"] {
            assert!(ObjMetadata::from_inventory_key(key).is_err(), "key={:?}", key);
        }
    }

    #[test]
    fn ordering_is_structural() {
        let mut ids = vec![
            ObjMetadata::new("", "Service", "b", "x"),
            ObjMetadata::new("", "ConfigMap", "b", "x"),
            ObjMetadata::new("", "ConfigMap", "a", "y"),
        ];
        ids.sort();
        assert_eq!(ids[0].namespace, "a");
        assert_eq!(ids[1].kind, "ConfigMap");
        assert_eq!(ids[2].kind, "Service");
    }
}
