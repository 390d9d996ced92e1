// ── Flush scheduler ──
//
// One-shot timers feeding the relay event loop. The scheduler never
// decides *whether* to arm; `SampleBuffer::put_and_arm` / `try_arm`
// do that under the buffer lock, and only a winning caller gets here.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::relay::RelayEvent;

#[derive(Debug, Clone)]
pub(crate) struct FlushScheduler {
    events_tx: mpsc::Sender<RelayEvent>,
    cancel: CancellationToken,
    runtime: Handle,
}

impl FlushScheduler {
    pub(crate) fn new(
        events_tx: mpsc::Sender<RelayEvent>,
        cancel: CancellationToken,
        runtime: Handle,
    ) -> Self {
        Self {
            events_tx,
            cancel,
            runtime,
        }
    }

    /// Fire `RelayEvent::FlushFired` once after `delay`.
    ///
    /// Safe to call from any thread; the timer runs on the relay's runtime.
    pub(crate) fn schedule(&self, delay: Duration) {
        trace!(?delay, "flush armed");
        self.runtime.spawn(fire_after(
            self.events_tx.clone(),
            self.cancel.clone(),
            delay,
            RelayEvent::FlushFired,
        ));
    }
}

/// Deliver `event` after `delay` unless `cancel` fires first.
pub(crate) async fn fire_after(
    tx: mpsc::Sender<RelayEvent>,
    cancel: CancellationToken,
    delay: Duration,
    event: RelayEvent,
) {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {}
        () = tokio::time::sleep(delay) => {
            let _ = tx.send(event).await;
        }
    }
}
