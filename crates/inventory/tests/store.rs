use std::collections::BTreeSet;
use std::sync::Arc;

use kset_core::{DryRunStrategy, ObjMetadata, INVENTORY_LABEL};
use kset_inventory::{InventoryClient, InventoryError};
use kset_kubehub::{ClusterClient, MemoryCluster};
use kube::core::DynamicObject;
use rand::{rngs::StdRng, SeedableRng};

fn marker(name: &str, id: &str) -> DynamicObject {
    serde_json::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": name, "namespace": "default", "labels": { INVENTORY_LABEL: id } }
    }))
    .unwrap()
}

fn ids(names: &[&str]) -> BTreeSet<ObjMetadata> {
    names.iter().map(|n| ObjMetadata::new("", "ConfigMap", "default", n)).collect()
}

#[tokio::test]
async fn load_before_first_store_is_empty() {
    let inv = InventoryClient::new(Arc::new(MemoryCluster::new()));
    assert!(inv.load(&marker("app", "id-1")).await.unwrap().is_empty());
}

#[tokio::test]
async fn store_then_load_round_trips_members() {
    let cluster = Arc::new(MemoryCluster::new());
    let inv = InventoryClient::new(cluster.clone());
    let m = marker("app", "id-1");
    inv.store(&m, &ids(&["a", "b"])).await.unwrap();
    assert_eq!(inv.load(&m).await.unwrap(), ids(&["a", "b"]));

    // Overwrite, not merge
    inv.store(&m, &ids(&["b"])).await.unwrap();
    assert_eq!(inv.load(&m).await.unwrap(), ids(&["b"]));
    assert_eq!(cluster.mutations(), 2);
}

#[tokio::test]
async fn shrinking_the_set_removes_keys_from_the_live_marker() {
    let cluster = Arc::new(MemoryCluster::new());
    let inv = InventoryClient::new(cluster.clone());
    let m = marker("app", "id-1");
    inv.store(&m, &ids(&["a", "b", "c"])).await.unwrap();
    inv.store(&m, &ids(&["c"])).await.unwrap();

    let live = cluster.get(&ObjMetadata::new("", "ConfigMap", "default", "app")).await.unwrap().unwrap();
    let keys: Vec<String> = live.data["data"].as_object().unwrap().keys().cloned().collect();
    assert_eq!(keys, vec![ObjMetadata::new("", "ConfigMap", "default", "c").to_inventory_key()]);

    inv.store(&m, &BTreeSet::new()).await.unwrap();
    let live = cluster.get(&ObjMetadata::new("", "ConfigMap", "default", "app")).await.unwrap().unwrap();
    assert!(live.data["data"].as_object().unwrap().is_empty());
    assert!(inv.load(&m).await.unwrap().is_empty());
}

#[tokio::test]
async fn client_dry_run_never_writes() {
    let cluster = Arc::new(MemoryCluster::new());
    let inv = InventoryClient::new(cluster.clone()).with_dry_run(DryRunStrategy::ClientOnly);
    inv.store(&marker("app", "id-1"), &ids(&["a"])).await.unwrap();
    assert_eq!(cluster.mutations(), 0);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let cluster = Arc::new(MemoryCluster::new());
    let inv = InventoryClient::new(cluster.clone());
    let m = marker("app", "id-1");
    inv.store(&m, &ids(&["a"])).await.unwrap();
    inv.delete(&m).await.unwrap();
    inv.delete(&m).await.unwrap();
    assert!(cluster.ids().is_empty());
}

#[tokio::test]
async fn foreign_marker_under_same_name_is_rejected() {
    let cluster = Arc::new(MemoryCluster::new());
    let inv = InventoryClient::new(cluster.clone());
    inv.store(&marker("app", "other-id"), &ids(&["a"])).await.unwrap();
    let err = inv.load(&marker("app", "id-1")).await.unwrap_err();
    assert!(matches!(err, InventoryError::InvalidMarker(_)), "err={:?}", err);
}

#[tokio::test]
async fn legacy_name_is_suffixed_then_adopted_on_later_runs() {
    let cluster = Arc::new(MemoryCluster::new());
    let inv = InventoryClient::new(cluster.clone());
    let mut rng = StdRng::seed_from_u64(3);

    let first = inv.prepare(marker("inventory", "id-1"), &mut rng).await.unwrap();
    let first_name = first.metadata.name.clone().unwrap();
    assert!(first_name.starts_with("inventory-") && first_name.len() > "inventory-".len());
    inv.store(&first, &ids(&["a"])).await.unwrap();

    let second = inv.prepare(marker("inventory", "id-1"), &mut rng).await.unwrap();
    assert_eq!(second.metadata.name.as_deref(), Some(first_name.as_str()));
    assert_eq!(inv.load(&second).await.unwrap(), ids(&["a"]));
}

#[tokio::test]
async fn two_live_markers_with_one_id_conflict() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.insert(marker("inventory-aaaa", "id-1")).unwrap();
    cluster.insert(marker("inventory-bbbb", "id-1")).unwrap();
    let inv = InventoryClient::new(cluster.clone());
    let err = inv.prepare(marker("inventory", "id-1"), &mut StdRng::seed_from_u64(1)).await.unwrap_err();
    match err {
        InventoryError::MultipleInventoryObjects { candidates } => assert_eq!(candidates.len(), 2),
        other => panic!("unexpected {:?}", other),
    }
    // Both markers stay in place
    assert_eq!(cluster.list("", "ConfigMap", "default", "").await.unwrap().len(), 2);
}
