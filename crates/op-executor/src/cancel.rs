// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cooperative cancellation for a running job (spec §4.5 "Cancellation").

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A cloneable, cheaply-shareable token used to signal cancellation.
///
/// All clones share the same underlying state; cancelling one immediately
/// makes every clone observe `is_cancelled() == true`.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// Creates a new token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner { cancelled: AtomicBool::new(false), notify: Notify::new() }),
        }
    }

    /// Signals cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// `true` once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled; resolves immediately if it
    /// already is.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            self.inner.notify.notified().await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken").field("cancelled", &self.is_cancelled()).finish()
    }
}

/// Why a run was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    /// The user explicitly requested cancellation through the API.
    UserRequested,
    /// The plugin or host reported a timeout.
    Timeout,
    /// The host system is shutting down.
    SystemShutdown,
}

impl CancellationReason {
    /// Human-readable description, suitable for a progress event message.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::UserRequested => "cancelled by user request",
            Self::Timeout => "cancelled due to timeout",
            Self::SystemShutdown => "cancelled because the system is shutting down",
        }
    }
}

/// Rejects a cancellation request against a job already in a terminal
/// status (spec §4.5 "rejects if current status is terminal").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlreadyTerminal;

/// Wraps a [`CancellationToken`] with the first reason it was cancelled for,
/// guarding against re-applying cancellation to an already-terminal job.
#[derive(Debug, Clone)]
pub struct CancellableRun {
    token: CancellationToken,
    reason: Arc<std::sync::Mutex<Option<CancellationReason>>>,
}

impl CancellableRun {
    /// Creates a new cancellable run wrapper.
    #[must_use]
    pub fn new(token: CancellationToken) -> Self {
        Self { token, reason: Arc::new(std::sync::Mutex::new(None)) }
    }

    /// Cancels the run with `reason` unless it is already terminal. Only the
    /// first reason is recorded across repeated calls.
    pub fn cancel(&self, terminal: bool, reason: CancellationReason) -> Result<(), AlreadyTerminal> {
        if terminal {
            return Err(AlreadyTerminal);
        }
        {
            let mut guard = self.reason.lock().expect("reason lock poisoned");
            if guard.is_none() {
                *guard = Some(reason);
            }
        }
        self.token.cancel();
        Ok(())
    }

    /// `true` once cancellation has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The first recorded cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<CancellationReason> {
        self.reason.lock().expect("reason lock poisoned").clone()
    }

    /// The underlying token, cloned to hand to a plugin or subprocess
    /// watcher.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_starts_not_cancelled() {
        assert!(!CancellationToken::new().is_cancelled());
    }

    #[test]
    fn clone_shares_state() {
        let a = CancellationToken::new();
        let b = a.clone();
        a.cancel();
        assert!(b.is_cancelled());
    }

    #[test]
    fn multiple_cancels_are_idempotent() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancellable_run_tracks_first_reason() {
        let run = CancellableRun::new(CancellationToken::new());
        run.cancel(false, CancellationReason::Timeout).unwrap();
        run.cancel(false, CancellationReason::UserRequested).unwrap();
        assert_eq!(run.reason(), Some(CancellationReason::Timeout));
    }

    #[test]
    fn cancel_on_terminal_job_is_rejected() {
        let run = CancellableRun::new(CancellationToken::new());
        let result = run.cancel(true, CancellationReason::UserRequested);
        assert_eq!(result, Err(AlreadyTerminal));
        assert!(!run.is_cancelled());
    }

    #[test]
    fn serde_roundtrip_for_cancellation_reason() {
        for reason in [CancellationReason::UserRequested, CancellationReason::Timeout, CancellationReason::SystemShutdown] {
            let json = serde_json::to_string(&reason).unwrap();
            let back: CancellationReason = serde_json::from_str(&json).unwrap();
            assert_eq!(back, reason);
        }
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        token.cancel();
        handle.await.unwrap();
    }
}
