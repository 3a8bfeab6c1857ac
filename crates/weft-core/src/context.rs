//! Request context: cancellation, deadline and transaction marker
//!
//! A `Context` is cheap to clone. Derived contexts share the cancellation
//! signal of their parent, keep the tighter of the two deadlines and may
//! carry the id of the transaction they belong to.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use weft_core_types::{RequestId, TransactionId};

use crate::errors::{Result, WeftError};

/// Shared cancellation flag
#[derive(Debug)]
struct CancelSignal {
    tx: watch::Sender<bool>,
}

/// Transaction membership shared by every context derived from it
#[derive(Debug, Clone)]
struct TransactionMarker {
    id: TransactionId,
    active: Arc<AtomicBool>,
}

/// Carries cancellation, deadline and correlation through every call
#[derive(Debug, Clone)]
pub struct Context {
    signal: Arc<CancelSignal>,
    deadline: Option<Instant>,
    request_id: RequestId,
    transaction: Option<TransactionMarker>,
}

impl Context {
    /// Create a root context with no deadline
    pub fn background() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            signal: Arc::new(CancelSignal { tx }),
            deadline: None,
            request_id: RequestId::new(),
            transaction: None,
        }
    }

    /// Derive a context that expires after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that expires at `deadline`, or earlier if the parent does
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    /// Derive a context with an explicit request id
    pub fn with_request_id(&self, request_id: RequestId) -> Self {
        Self {
            request_id,
            ..self.clone()
        }
    }

    /// Derive a context marked as belonging to an active transaction
    pub fn with_transaction(&self, tx_id: TransactionId) -> Self {
        Self {
            transaction: Some(TransactionMarker {
                id: tx_id,
                active: Arc::new(AtomicBool::new(true)),
            }),
            ..self.clone()
        }
    }

    /// Clear the transaction marker on this context and its clones
    pub(crate) fn end_transaction(&self) {
        if let Some(marker) = &self.transaction {
            marker.active.store(false, Ordering::Release);
        }
    }

    /// Cancel this context and every context derived from the same root
    pub fn cancel(&self) {
        self.signal.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.signal.tx.borrow()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Active transaction marker, if any
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.transaction
            .as_ref()
            .filter(|marker| marker.active.load(Ordering::Acquire))
            .map(|marker| &marker.id)
    }

    /// Error describing why the context is done, if it is
    pub fn err(&self, op: &str) -> Option<WeftError> {
        if self.is_cancelled() {
            return Some(WeftError::Cancelled { op: op.to_string() });
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Some(WeftError::DeadlineExceeded { op: op.to_string() })
            }
            _ => None,
        }
    }

    /// Resolve once the context is cancelled or its deadline passes
    pub async fn done(&self, op: &str) -> WeftError {
        let mut rx = self.signal.tx.subscribe();
        let cancelled = async move {
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = cancelled => WeftError::Cancelled { op: op.to_string() },
                    _ = tokio::time::sleep_until(deadline) => {
                        WeftError::DeadlineExceeded { op: op.to_string() }
                    }
                }
            }
            None => {
                cancelled.await;
                WeftError::Cancelled { op: op.to_string() }
            }
        }
    }

    /// Run `fut` unless the context finishes first
    ///
    /// An already finished context fails without polling `fut` at all.
    pub async fn run<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err(op) {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done(op) => Err(err),
            res = fut => res,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
