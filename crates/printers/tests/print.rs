use std::sync::Arc;

use kset_apply::{Applier, ApplyOptions};
use kset_core::{DryRunStrategy, Event, RunError, INVENTORY_LABEL};
use kset_kubehub::MemoryCluster;
use kset_printers::{print, printer, BasicPrinter, PrintError, PrinterKind, SummaryPrinter};
use kube::core::DynamicObject;

fn manifests() -> Vec<DynamicObject> {
    vec![
        serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "inventory-a1b2c3d4", "namespace": "default", "labels": { INVENTORY_LABEL: "test" } }
        }))
        .unwrap(),
        serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "test-map", "namespace": "default" },
            "data": { "a": "b" }
        }))
        .unwrap(),
    ]
}

async fn render(kind: PrinterKind, dry_run: DryRunStrategy) -> (String, Result<(), PrintError>) {
    let cluster = Arc::new(MemoryCluster::new());
    let stream = Applier::new(cluster).run_objects(manifests(), ApplyOptions { dry_run, ..Default::default() });
    let mut p = printer(kind, dry_run);
    let mut buf = Vec::new();
    let res = print(p.as_mut(), stream, &mut buf).await;
    (String::from_utf8(buf).unwrap(), res)
}

#[tokio::test]
async fn summary_lists_marker_then_objects() {
    let (text, res) = render(PrinterKind::Summary, DryRunStrategy::None).await;
    res.unwrap();
    assert_eq!(text, "applied ConfigMap/inventory-a1b2c3d4\napplied ConfigMap/test-map\nResources: 2\n");
}

#[tokio::test]
async fn events_printer_reports_each_phase() {
    let (text, res) = render(PrinterKind::Events, DryRunStrategy::None).await;
    res.unwrap();
    assert_eq!(text, "configmap/test-map created\n1 resource(s) applied. 1 created, 0 unchanged, 0 configured\n0 resource(s) pruned, 0 skipped\n");
}

#[tokio::test]
async fn preview_is_marked() {
    let (text, res) = render(PrinterKind::Events, DryRunStrategy::ClientOnly).await;
    res.unwrap();
    assert!(text.lines().all(|l| l.ends_with(" (preview)")), "{text}");
}

#[tokio::test]
async fn json_lines_decode_back_into_events() {
    let (text, res) = render(PrinterKind::Json, DryRunStrategy::None).await;
    res.unwrap();
    let events: Vec<Event> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(events.len(), 4);
    assert!(text.lines().next().unwrap().starts_with(r#"{"type":"Init","subEvent":"#));
}

#[tokio::test]
async fn error_event_surfaces_as_run_error() {
    let events = futures::stream::iter(vec![Event::error(RunError::NoInventoryObject)]);
    let mut p = SummaryPrinter::new(DryRunStrategy::None);
    let mut buf = Vec::new();
    let err = print(&mut p, events, &mut buf).await.unwrap_err();
    assert!(matches!(err, PrintError::Run(RunError::NoInventoryObject)));
    assert!(buf.is_empty());

    let mut basic = BasicPrinter::new(DryRunStrategy::None);
    let events = futures::stream::iter(vec![Event::error(RunError::Cancelled)]);
    assert!(print(&mut basic, events, &mut Vec::new()).await.is_err());
}
