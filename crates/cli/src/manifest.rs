//! Manifest reading: multi-document YAML from files, directories or stdin.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use kset_core::INVENTORY_LABEL;
use kube::core::DynamicObject;
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_MAX_YAML_BYTES: usize = 8 * 1024 * 1024;

/// Kinds that never carry a namespace.
const CLUSTER_SCOPED: &[&str] = &[
    "Namespace",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "PersistentVolume",
    "StorageClass",
    "Node",
    "PriorityClass",
    "ValidatingWebhookConfiguration",
    "MutatingWebhookConfiguration",
    "APIService",
];

pub fn max_yaml_bytes() -> usize {
    std::env::var("KSET_MAX_YAML_BYTES").ok().and_then(|s| s.parse::<usize>().ok()).filter(|n| *n > 0).unwrap_or(DEFAULT_MAX_YAML_BYTES)
}

/// Read every object from `paths`; no paths (or `-`) means stdin.
/// Directories contribute their `.yaml`, `.yml` and `.json` files in name order.
pub fn read_manifests(paths: &[PathBuf], max_bytes: usize) -> Result<Vec<DynamicObject>> {
    let mut objs = Vec::new();
    let mut budget = max_bytes;
    if paths.is_empty() || (paths.len() == 1 && paths[0].as_os_str() == "-") {
        let mut text = String::new();
        std::io::stdin().take(max_bytes as u64 + 1).read_to_string(&mut text).context("reading stdin")?;
        if text.len() > max_bytes { bail!("stdin exceeds {} bytes (KSET_MAX_YAML_BYTES)", max_bytes); }
        objs.extend(parse_documents(&text).context("parsing stdin")?);
        return Ok(objs);
    }
    for path in paths {
        for file in expand(path)? {
            let text = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            budget = budget.checked_sub(text.len()).with_context(|| format!("manifests exceed {} bytes (KSET_MAX_YAML_BYTES)", max_bytes))?;
            let docs = parse_documents(&text).with_context(|| format!("parsing {}", file.display()))?;
            debug!(file = %file.display(), objects = docs.len(), "read manifest");
            objs.extend(docs);
        }
    }
    Ok(objs)
}

fn expand(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.is_dir() { return Ok(vec![path.to_path_buf()]); }
    let mut files: Vec<PathBuf> = std::fs::read_dir(path)
        .with_context(|| format!("listing {}", path.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && matches!(p.extension().and_then(|e| e.to_str()), Some("yaml" | "yml" | "json")))
        .collect();
    files.sort();
    Ok(files)
}

/// Split a multi-document stream into objects. Empty documents are skipped
/// and `kind: List` documents contribute their items.
pub fn parse_documents(text: &str) -> Result<Vec<DynamicObject>> {
    let mut out = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(doc)?;
        if value.is_null() { continue; }
        let json = serde_json::to_value(&value)?;
        if json.get("kind").and_then(|k| k.as_str()).is_some_and(|k| k == "List" || k.ends_with("List")) {
            if let Some(items) = json.get("items").and_then(|i| i.as_array()) {
                for item in items { out.push(to_object(item.clone())?); }
                continue;
            }
        }
        out.push(to_object(json)?);
    }
    Ok(out)
}

fn to_object(json: serde_json::Value) -> Result<DynamicObject> {
    let obj: DynamicObject = serde_json::from_value(json).context("not a Kubernetes object (apiVersion, kind and metadata are required)")?;
    if obj.types.is_none() { bail!("object {:?} has no apiVersion/kind", obj.metadata.name); }
    Ok(obj)
}

/// Fill in `namespace` on namespaced objects that don't set one.
pub fn default_namespace(objs: &mut [DynamicObject], namespace: &str) {
    for obj in objs.iter_mut() {
        let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default();
        if CLUSTER_SCOPED.contains(&kind) { continue; }
        if obj.metadata.namespace.as_deref().map_or(true, str::is_empty) {
            obj.metadata.namespace = Some(namespace.to_string());
        }
    }
}

/// YAML for a fresh inventory marker template.
pub fn marker_template(name: &str, namespace: &str, inventory_id: &str) -> String {
    format!(
        "# NOTE: This resource records the objects applied together with it. Keep it alongside them.\n\
         apiVersion: v1\n\
         kind: ConfigMap\n\
         metadata:\n  name: {name}\n  namespace: {namespace}\n  labels:\n    {label}: \"{id}\"\n",
        name = name,
        namespace = namespace,
        label = INVENTORY_LABEL,
        id = inventory_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TWO_DOCS: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\n---\napiVersion: v1\nkind: Namespace\nmetadata:\n  name: team\n";

    #[test]
    fn multi_document_yaml_skips_empty_documents() {
        let objs = parse_documents(TWO_DOCS).unwrap();
        assert_eq!(objs.len(), 2);
        assert_eq!(objs[1].types.as_ref().unwrap().kind, "Namespace");
    }

    #[test]
    fn list_documents_are_flattened() {
        let text = "apiVersion: v1\nkind: List\nitems:\n- apiVersion: v1\n  kind: Secret\n  metadata:\n    name: s\n- apiVersion: v1\n  kind: ConfigMap\n  metadata:\n    name: c\n";
        let names: Vec<_> = parse_documents(text).unwrap().into_iter().map(|o| o.metadata.name.unwrap()).collect();
        assert_eq!(names, vec!["s", "c"]);
    }

    #[test]
    fn documents_without_kind_are_rejected() {
        assert!(parse_documents("metadata:\n  name: x\n").is_err());
    }

    #[test]
    fn directories_are_read_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.yaml"), "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: second\n").unwrap();
        std::fs::write(dir.path().join("a.yml"), "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: first\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let objs = read_manifests(&[dir.path().to_path_buf()], DEFAULT_MAX_YAML_BYTES).unwrap();
        let names: Vec<_> = objs.iter().map(|o| o.metadata.name.clone().unwrap()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn oversized_input_is_refused() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(TWO_DOCS.as_bytes()).unwrap();
        assert!(read_manifests(&[f.path().to_path_buf()], 16).is_err());
        assert_eq!(read_manifests(&[f.path().to_path_buf()], 4096).unwrap().len(), 2);
    }

    #[test]
    fn namespace_defaults_skip_cluster_scoped_kinds() {
        let mut objs = parse_documents(TWO_DOCS).unwrap();
        default_namespace(&mut objs, "prod");
        assert_eq!(objs[0].metadata.namespace.as_deref(), Some("prod"));
        assert_eq!(objs[1].metadata.namespace, None);
    }

    #[test]
    fn marker_template_parses_back_into_a_marker() {
        let objs = parse_documents(&marker_template("inventory", "default", "abc-123")).unwrap();
        assert_eq!(objs.len(), 1);
        assert_eq!(kset_inventory::inventory_label(&objs[0]).as_deref(), Some("abc-123"));
    }
}
