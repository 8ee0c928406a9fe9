//! kset status: decide whether applied objects have converged, and poll until they do.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kset_core::{ObjMetadata, ResourceStatus, StatusEvent};
use kset_kubehub::{ClientError, ClusterClient};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod evaluate;

pub use evaluate::compute_status;

/// Pluggable status evaluation for a single object.
#[async_trait::async_trait]
pub trait StatusReader: Send + Sync {
    async fn read_status(&self, id: &ObjMetadata) -> Result<(ResourceStatus, String), ClientError>;
}

/// Reads the live object through a [`ClusterClient`] and evaluates it with [`compute_status`].
pub struct ClientStatusReader<C: ClusterClient + ?Sized> {
    client: Arc<C>,
}

impl<C: ClusterClient + ?Sized> ClientStatusReader<C> {
    pub fn new(client: Arc<C>) -> Self { Self { client } }
}

#[async_trait::async_trait]
impl<C: ClusterClient + ?Sized> StatusReader for ClientStatusReader<C> {
    async fn read_status(&self, id: &ObjMetadata) -> Result<(ResourceStatus, String), ClientError> {
        match self.client.get(id).await? {
            Some(obj) => Ok(compute_status(&obj)),
            None => Ok((ResourceStatus::Unknown, "Resource not found".to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    /// Give up after this long; `None` waits until cancelled.
    pub timeout: Option<Duration>,
}

impl Default for PollOptions {
    fn default() -> Self { Self { interval: Duration::from_secs(2), timeout: Some(Duration::from_secs(60)) } }
}

/// Poll `ids` until all are `Current`, streaming changes. The stream ends with
/// exactly one `Completed` or `Aborted` (timeout / cancellation) and then closes.
pub fn poll(reader: Arc<dyn StatusReader>, ids: Vec<ObjMetadata>, opts: PollOptions, cancel: CancellationToken) -> mpsc::Receiver<StatusEvent> {
    let (tx, rx) = mpsc::channel(ids.len().max(1) * 2);
    tokio::spawn(async move {
        let outcome = poll_loop(reader.as_ref(), &ids, opts, &cancel, &tx).await;
        if let Some(last) = outcome { let _ = tx.send(last).await; }
    });
    rx
}

/// Returns the terminal event to send, or `None` when the consumer went away.
async fn poll_loop(reader: &dyn StatusReader, ids: &[ObjMetadata], opts: PollOptions, cancel: &CancellationToken, tx: &mpsc::Sender<StatusEvent>) -> Option<StatusEvent> {
    let deadline = opts.timeout.map(|t| Instant::now() + t);
    let mut latest: BTreeMap<&ObjMetadata, (ResourceStatus, String)> = BTreeMap::new();
    let mut last_error: BTreeMap<&ObjMetadata, String> = BTreeMap::new();
    info!(objects = ids.len(), timeout = ?opts.timeout, "waiting for resources to become current");
    loop {
        for id in ids {
            if cancel.is_cancelled() { return Some(StatusEvent::Aborted); }
            match reader.read_status(id).await {
                Ok(next) => {
                    last_error.remove(id);
                    if latest.get(id) == Some(&next) { continue; }
                    debug!(object = %id, status = %next.0, "status changed");
                    let ev = StatusEvent::ResourceUpdate { object: id.clone(), status: next.0, message: next.1.clone() };
                    latest.insert(id, next);
                    tx.send(ev).await.ok()?;
                }
                Err(e) => {
                    let message = e.to_string();
                    if last_error.get(id) == Some(&message) { continue; }
                    warn!(object = %id, error = %message, "status read failed");
                    last_error.insert(id, message.clone());
                    tx.send(StatusEvent::Error { object: id.clone(), message }).await.ok()?;
                }
            }
        }
        if ids.iter().all(|id| matches!(latest.get(id), Some((ResourceStatus::Current, _)))) {
            return Some(StatusEvent::Completed);
        }
        let wake = Instant::now() + opts.interval;
        let wake = deadline.map_or(wake, |d| wake.min(d));
        tokio::select! {
            _ = cancel.cancelled() => return Some(StatusEvent::Aborted),
            _ = tokio::time::sleep_until(wake) => {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    metrics::counter!("status_wait_timeouts", 1u64);
                    return Some(StatusEvent::Aborted);
                }
            }
        }
    }
}
