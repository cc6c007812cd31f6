//! Cooperative cancellation for in-flight queries.
//!
//! An [`AbortController`] owns the abort decision; every network call tied to
//! a query receives a cloned [`AbortSignal`]. The reason travels with the
//! signal, so callers tell cancellation apart from failure by asking the
//! signal rather than by looking at error text.

use std::future::Future;

use tokio::sync::watch;

/// Why a query was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The user pressed cancel.
    UserCancelled,
    /// A newer submission replaced this query.
    Superseded,
    /// The transcript was cleared.
    Cleared,
}

impl AbortReason {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::UserCancelled => "user_cancelled",
            AbortReason::Superseded => "superseded",
            AbortReason::Cleared => "cleared",
        }
    }
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Owner side of an abort channel.
#[derive(Debug)]
pub struct AbortController {
    tx: watch::Sender<Option<AbortReason>>,
}

/// Observer side of an abort channel.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<Option<AbortReason>>,
}

impl AbortController {
    /// Create a controller that has not been aborted.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Hand out a signal bound to this controller.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Abort with `reason`. The first reason sticks; returns false if the
    /// controller was already aborted.
    pub fn abort(&self, reason: AbortReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }

    /// Reason recorded by the first [`abort`](Self::abort) call, if any.
    pub fn reason(&self) -> Option<AbortReason> {
        *self.tx.borrow()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn none() -> Self {
        let (_tx, rx) = watch::channel(None);
        Self { rx }
    }

    /// Current abort reason.
    pub fn reason(&self) -> Option<AbortReason> {
        *self.rx.borrow()
    }

    /// True once the controller has aborted.
    pub fn is_aborted(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolve when the controller aborts. Pends forever if the controller is
    /// dropped without aborting.
    pub async fn aborted(&mut self) -> AbortReason {
        let reason = match self.rx.wait_for(Option::is_some).await {
            Ok(current) => *current,
            Err(_) => None,
        };
        match reason {
            Some(reason) => reason,
            None => std::future::pending().await,
        }
    }

    /// Drive `future` to completion unless the signal fires first.
    pub async fn guard<F: Future>(&mut self, future: F) -> Result<F::Output, AbortReason> {
        tokio::select! {
            biased;
            reason = self.aborted() => Err(reason),
            output = future => Ok(output),
        }
    }
}
