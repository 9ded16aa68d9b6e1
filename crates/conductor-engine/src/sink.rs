use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use pin_project_lite::pin_project;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use conductor_core::events::{DeltaEvent, FinishReason};
use conductor_core::ids::RunId;

use crate::error::EngineError;

/// Sending half of a run's event stream. Guarantees that at most one
/// `Finish` is delivered and that nothing follows it.
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::Sender<DeltaEvent>,
    finished: bool,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<DeltaEvent>) -> Self {
        Self { tx, finished: false }
    }

    /// Deliver one event, waiting for buffer space. Fails once the consumer
    /// has dropped the stream.
    pub async fn emit(&mut self, event: DeltaEvent) -> Result<(), EngineError> {
        if self.finished {
            warn!(event = event.event_type(), "event after finish dropped");
            return Ok(());
        }
        if event.is_finish() {
            self.finished = true;
        }
        self.tx.send(event).await.map_err(|_| EngineError::ConsumerGone)
    }

    pub async fn emit_all(&mut self, events: Vec<DeltaEvent>) -> Result<(), EngineError> {
        for event in events {
            self.emit(event).await?;
        }
        Ok(())
    }

    pub async fn finish(&mut self, reason: FinishReason) -> Result<(), EngineError> {
        self.emit(DeltaEvent::Finish { reason }).await
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the consumer drops the stream.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

pin_project! {
    /// Receiving half of a run: the ordered delta events of one run.
    /// Dropping it disconnects the run.
    pub struct RunStream {
        run_id: RunId,
        #[pin]
        inner: ReceiverStream<DeltaEvent>,
    }
}

impl RunStream {
    pub fn new(run_id: RunId, rx: mpsc::Receiver<DeltaEvent>) -> Self {
        Self {
            run_id,
            inner: ReceiverStream::new(rx),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }
}

impl Stream for RunStream {
    type Item = DeltaEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
