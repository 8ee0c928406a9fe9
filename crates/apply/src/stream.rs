use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use kset_core::{Event, RunError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::error;

/// Cancellation handle for an in-flight run.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) { self.token.cancel(); }
    pub fn is_cancelled(&self) -> bool { self.token.is_cancelled() }
}

/// Ordered events of one run. The producer closes the queue when the run is
/// over; closure without a prior [`Event::Error`] means success.
pub struct EventStream {
    rx: mpsc::Receiver<Event>,
    cancel: CancelHandle,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<Event> { self.rx.recv().await }

    pub fn cancel_handle(&self) -> CancelHandle { self.cancel.clone() }

    /// Drain the stream until the producer closes it.
    pub async fn collect(mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Some(ev) = self.rx.recv().await { out.push(ev); }
        out
    }

    pub fn into_parts(self) -> (mpsc::Receiver<Event>, CancelHandle) { (self.rx, self.cancel) }
}

impl futures::Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> { self.rx.poll_recv(cx) }
}

/// Run `body` as the single producer of a fresh stream.
///
/// The body runs in its own task under a supervisor holding a second sender:
/// a panic turns into a final `Error(Internal)` event, and the queue closes
/// only once both have finished. Helper tasks the body starts on the tracker
/// are awaited before that final event.
pub(crate) fn spawn_run<F, Fut>(cap: usize, body: F) -> EventStream
where
    F: FnOnce(mpsc::Sender<Event>, CancellationToken, TaskTracker) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(cap.max(1));
    let token = CancellationToken::new();
    let helpers = TaskTracker::new();
    let run = body(tx.clone(), token.clone(), helpers.clone());
    tokio::spawn(async move {
        let joined = tokio::spawn(run).await;
        helpers.close();
        helpers.wait().await;
        if let Err(e) = joined {
            if e.is_panic() {
                error!(error = %e, "run task panicked");
                let _ = tx.send(Event::error(RunError::Internal("run task panicked".into()))).await;
            }
        }
    });
    EventStream { rx, cancel: CancelHandle { token } }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use kset_core::{ApplyEvent, EventType};

    #[tokio::test]
    async fn panicking_run_ends_with_internal_error() {
        let stream = spawn_run(4, |tx, _, _| async move {
            let _ = tx.send(Event::Apply(ApplyEvent::Completed)).await;
            panic!("boom");
        });
        let events = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], Event::error(RunError::Internal("run task panicked".into())));
    }

    #[tokio::test]
    async fn panic_error_follows_helper_output() {
        let stream = spawn_run(8, |tx, _, helpers| async move {
            let (fwd_tx, mut fwd_rx) = mpsc::channel::<Event>(8);
            let out = tx.clone();
            helpers.spawn(async move {
                while let Some(ev) = fwd_rx.recv().await { let _ = out.send(ev).await; }
            });
            for _ in 0..3 { let _ = fwd_tx.send(Event::Apply(ApplyEvent::Completed)).await; }
            panic!("boom");
        });
        let events = stream.collect().await;
        assert_eq!(events.len(), 4);
        assert_eq!(events.last(), Some(&Event::error(RunError::Internal("run task panicked".into()))));
    }

    #[tokio::test]
    async fn stream_closes_when_body_finishes() {
        let mut stream = spawn_run(1, |tx, _, _| async move {
            for _ in 0..3 { let _ = tx.send(Event::Apply(ApplyEvent::Completed)).await; }
        });
        let mut n = 0;
        while let Some(ev) = stream.next().await {
            assert_eq!(ev.event_type(), EventType::Apply);
            n += 1;
        }
        assert_eq!(n, 3);
    }

    #[tokio::test]
    async fn cancel_handle_reaches_the_body() {
        let stream = spawn_run(1, |tx, token, _| async move {
            token.cancelled().await;
            let _ = tx.send(Event::error(RunError::Cancelled)).await;
        });
        stream.cancel_handle().cancel();
        assert_eq!(stream.collect().await, vec![Event::error(RunError::Cancelled)]);
    }
}
