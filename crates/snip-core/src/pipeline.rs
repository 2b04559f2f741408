//! Fan-in of deletion requests into a backend.
//!
//! A caller turns a set of codes into a [`DeletionStream`] with
//! [`DeletionStream::submit`]. A producer task enqueues every request into a
//! bounded channel and then drops its sender, which closes the stream. The
//! backend's `mark_deleted` drains the stream until it observes the close,
//! so awaiting `mark_deleted` means the whole submitted set was handled.

use crate::owner::OwnerId;
use crate::shortcode::ShortCode;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A request to tombstone `code` on behalf of `owner`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeletionRequest {
    pub owner: OwnerId,
    pub code: ShortCode,
}

impl DeletionRequest {
    pub fn new(owner: OwnerId, code: ShortCode) -> Self {
        Self { owner, code }
    }
}

/// Producing half of a [`DeletionStream`]. Dropping every sender closes the
/// stream.
pub type DeletionSender = mpsc::Sender<DeletionRequest>;

/// A bounded, producer-closed stream of [`DeletionRequest`]s.
#[derive(Debug)]
pub struct DeletionStream {
    rx: mpsc::Receiver<DeletionRequest>,
}

impl DeletionStream {
    /// Creates an empty stream with the given capacity and its sender.
    ///
    /// A capacity of zero is raised to one.
    pub fn channel(capacity: usize) -> (DeletionSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }

    /// Spawns a producer that enqueues one request per code and then closes
    /// the stream.
    ///
    /// Must be called from within a tokio runtime. The producer only waits
    /// when the channel is full; if the consumer goes away early the
    /// remaining requests are discarded.
    pub fn submit(owner: OwnerId, codes: Vec<ShortCode>, capacity: usize) -> Self {
        let (tx, stream) = Self::channel(capacity);
        let total = codes.len();

        tokio::spawn(async move {
            for code in codes {
                trace!(owner = %owner, code = %code, "enqueueing deletion request");
                if tx.send(DeletionRequest::new(owner, code)).await.is_err() {
                    debug!(owner = %owner, "deletion consumer dropped before the stream was drained");
                    return;
                }
            }
            trace!(owner = %owner, total, "deletion stream closed");
        });

        stream
    }

    /// Receives the next request, or `None` once the producer has closed the
    /// stream and every enqueued request has been received.
    pub async fn next(&mut self) -> Option<DeletionRequest> {
        self.rx.recv().await
    }

    /// Drains the remaining requests into a vector.
    pub async fn collect(mut self) -> Vec<DeletionRequest> {
        let mut requests = Vec::new();
        while let Some(request) = self.next().await {
            requests.push(request);
        }
        requests
    }
}
