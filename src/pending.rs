//! Pending call table: correlates `response` frames with outstanding calls.
//!
//! Call IDs come from one counter per context. They start at 1 and wrap back
//! to 1 before leaving the range a JavaScript number represents exactly.
//!
//! An entry disappears when its response arrives, when the call times out,
//! or when the caller drops the [`PendingReply`]. A response that arrives
//! after that is an [`OrphanResponse`](ConnectorError::OrphanResponse).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::connector::Reply;
use crate::error::{ConnectorError, Result};

/// Largest integer a JavaScript peer represents exactly (2^53 - 1).
pub const MAX_SAFE_CALL_ID: u64 = (1 << 53) - 1;

/// Outstanding calls keyed by call ID.
pub(crate) struct PendingCalls {
    next_id: AtomicU64,
    calls: Mutex<HashMap<u64, oneshot::Sender<Result<Reply>>>>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self::starting_at(1)
    }

    fn starting_at(id: u64) -> Self {
        Self {
            next_id: AtomicU64::new(id),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next ID from the shared counter.
    pub(crate) fn next_id(&self) -> u64 {
        let step = |id: u64| Some(if id >= MAX_SAFE_CALL_ID { 1 } else { id + 1 });
        // the closure never returns None, so both arms carry the previous value
        match self.next_id.fetch_update(Ordering::Relaxed, Ordering::Relaxed, step) {
            Ok(id) | Err(id) => id,
        }
    }

    /// Record a new call and return the receiving end of its outcome.
    pub(crate) fn register(&self, id: u64) -> oneshot::Receiver<Result<Reply>> {
        let (tx, rx) = oneshot::channel();
        self.calls.lock().insert(id, tx);
        rx
    }

    /// Settle call `id`.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::OrphanResponse`] if no such call is pending.
    pub(crate) fn complete(&self, id: u64, outcome: Result<Reply>) -> Result<()> {
        let tx = self
            .calls
            .lock()
            .remove(&id)
            .ok_or(ConnectorError::OrphanResponse(id))?;
        // caller may have given up between the lookup and now
        let _ = tx.send(outcome);
        Ok(())
    }

    /// Forget call `id` without settling it.
    pub(crate) fn remove(&self, id: u64) -> bool {
        self.calls.lock().remove(&id).is_some()
    }

    /// Drop every pending call; their futures fail with `ConnectionClosed`.
    pub(crate) fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Number of outstanding calls.
    pub(crate) fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Wrap `rx` into a [`PendingReply`] that cleans up after itself.
    pub(crate) fn reply_future(
        self: &Arc<Self>,
        id: u64,
        rx: oneshot::Receiver<Result<Reply>>,
        timeout: Option<Duration>,
    ) -> PendingReply {
        let guard = EntryGuard {
            calls: self.clone(),
            id,
        };
        let inner = async move {
            let _guard = guard;
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, rx).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::warn!("call {} timed out after {:?}", id, limit);
                        return Err(ConnectorError::CallTimeout(id));
                    }
                },
                None => rx.await,
            };
            outcome.unwrap_or(Err(ConnectorError::ConnectionClosed))
        };
        PendingReply {
            id,
            inner: Box::pin(inner),
        }
    }
}

/// Removes the table entry when the waiting future goes away.
struct EntryGuard {
    calls: Arc<PendingCalls>,
    id: u64,
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        if self.calls.remove(self.id) {
            tracing::debug!("call {} abandoned before its response", self.id);
        }
    }
}

/// Future for the outcome of [`Connector::exec_peer`](crate::Connector::exec_peer).
///
/// Resolves to the peer's [`Reply`], or to
/// [`Remote`](ConnectorError::Remote) when the peer's handler failed.
/// Dropping it cancels the bookkeeping for the call.
pub struct PendingReply {
    id: u64,
    inner: BoxFuture<'static, Result<Reply>>,
}

impl PendingReply {
    /// Call ID carried in the `exec` frame.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply").field("id", &self.id).finish()
    }
}

impl Future for PendingReply {
    type Output = Result<Reply>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}
