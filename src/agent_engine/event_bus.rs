use tokio::sync::mpsc;

use crate::errors::{AutoGlmError, AutoGlmResult};

/// Producer side of a run's event channel.
///
/// A dropped receiver means the consumer has gone away; `emit` then reports
/// `Cancelled` so the run stops at its next event.
pub struct EventSink<E> {
    tx: mpsc::Sender<E>,
}

impl<E> Clone for EventSink<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E: Send> EventSink<E> {
    pub fn new(tx: mpsc::Sender<E>) -> Self {
        Self { tx }
    }

    /// Bounded channel plus the sink feeding it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<E>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub async fn emit(&self, event: E) -> AutoGlmResult<()> {
        self.tx.send(event).await.map_err(|_| {
            tracing::debug!("event receiver dropped");
            AutoGlmError::Cancelled
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
