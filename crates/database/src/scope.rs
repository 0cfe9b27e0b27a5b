//! Explicit execution scopes and the transaction capability they may carry.
//!
//! A [`Scope`] is threaded through every [`Client`](crate::Client) call. It
//! decides two things: whether the call may still run (cancellation and
//! deadline) and where it runs (the pool, or the [`TxHandle`] attached to the
//! scope). Scopes are immutable; each derivation returns a new value.

use crate::error::{DbError, Interrupted};
use sqlx::any::Any;
use sqlx::{AnyConnection, AnyPool, Transaction};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type TxSlot = Option<Transaction<'static, Any>>;

/// Exclusive access to a transaction for the duration of one statement.
pub(crate) type TxGuard = OwnedMutexGuard<TxSlot>;

/// The connection of the transaction behind `guard`, if it is still open.
pub(crate) fn live(guard: &mut TxGuard) -> Result<&mut AnyConnection, DbError> {
    guard
        .as_mut()
        .map(|tx| &mut **tx)
        .ok_or(DbError::TransactionFinished)
}

#[derive(Clone, Debug, Default)]
pub struct Scope {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    transaction: Option<TxHandle>,
}

impl Scope {
    /// A scope that is never cancelled, has no deadline and no transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope cancelled by `token`.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            ..Self::default()
        }
    }

    /// Derives a scope that is cancelled with this one, and can additionally
    /// be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            transaction: self.transaction.clone(),
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a scope with `deadline`, or keeps the current one if it is earlier.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        Self {
            cancel: self.cancel.clone(),
            deadline: Some(deadline),
            transaction: self.transaction.clone(),
        }
    }

    /// Derives a scope whose statements run on `transaction`.
    ///
    /// A scope chain carries at most one transaction. Attaching a second one
    /// fails with [`DbError::TransactionAttached`] instead of replacing it.
    pub fn with_transaction(&self, transaction: TxHandle) -> Result<Self, DbError> {
        if self.transaction.is_some() {
            return Err(DbError::TransactionAttached);
        }
        Ok(Self {
            cancel: self.cancel.clone(),
            deadline: self.deadline,
            transaction: Some(transaction),
        })
    }

    pub fn transaction(&self) -> Option<&TxHandle> {
        self.transaction.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancels this scope and every scope derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns why the scope can no longer run work, if it can't.
    pub fn interrupted(&self) -> Option<Interrupted> {
        if self.cancel.is_cancelled() {
            Some(Interrupted::Cancelled)
        } else if self.deadline.is_some_and(|d| d <= Instant::now()) {
            Some(Interrupted::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves once the scope is cancelled or its deadline passes.
    pub async fn done(&self) -> Interrupted {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Interrupted::Cancelled,
            _ = deadline => Interrupted::DeadlineExceeded,
        }
    }

    /// Runs `work` unless the scope ends first.
    ///
    /// An already-ended scope fails without polling `work`. Dropping `work`
    /// on interruption releases whatever it had acquired.
    pub async fn guard<F, T, E>(&self, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<Interrupted>,
    {
        if let Some(reason) = self.interrupted() {
            return Err(reason.into());
        }
        tokio::select! {
            biased;
            reason = self.done() => Err(reason.into()),
            result = work => result,
        }
    }
}

/// A shareable handle to an open transaction.
///
/// Whoever creates the handle owns the transaction and is the only party that
/// commits or rolls it back. [`Client`](crate::Client) only borrows it, one
/// statement at a time, in call order.
///
/// While a [`Rows`](crate::Rows) cursor is open on the transaction, every
/// other use of it fails with [`DbError::TransactionBusy`] until the cursor
/// is dropped.
#[derive(Clone)]
pub struct TxHandle {
    slot: Arc<Mutex<TxSlot>>,
    statements: Arc<AtomicU64>,
    cursor: Arc<AtomicBool>,
}

impl TxHandle {
    pub fn new(transaction: Transaction<'static, Any>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(transaction))),
            statements: Arc::new(AtomicU64::new(0)),
            cursor: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Opens a transaction on `pool` and wraps it.
    pub async fn begin(pool: &AnyPool) -> Result<Self, DbError> {
        let transaction = pool
            .begin()
            .await
            .map_err(|e| DbError::connection("begin", e))?;
        Ok(Self::new(transaction))
    }

    /// Number of statements that have been routed to this transaction.
    pub fn statements(&self) -> u64 {
        self.statements.load(Ordering::Relaxed)
    }

    pub async fn commit(self) -> Result<(), DbError> {
        let transaction = self.take().await?;
        transaction
            .commit()
            .await
            .map_err(|e| DbError::connection("commit", e))
    }

    pub async fn rollback(self) -> Result<(), DbError> {
        let transaction = self.take().await?;
        transaction
            .rollback()
            .await
            .map_err(|e| DbError::connection("rollback", e))
    }

    async fn take(&self) -> Result<Transaction<'static, Any>, DbError> {
        self.ensure_idle()?;
        let mut slot = self.slot.lock().await;
        self.ensure_idle()?;
        slot.take().ok_or(DbError::TransactionFinished)
    }

    /// Waits for exclusive use of the transaction and counts the statement.
    pub(crate) async fn acquire(&self) -> Result<TxGuard, DbError> {
        self.ensure_idle()?;
        let guard = self.slot.clone().lock_owned().await;
        self.ensure_idle()?;
        if guard.is_none() {
            return Err(DbError::TransactionFinished);
        }
        self.statements.fetch_add(1, Ordering::Relaxed);
        Ok(guard)
    }

    /// Like [`acquire`](Self::acquire), and reserves the transaction for a
    /// cursor until the returned mark is dropped.
    pub(crate) async fn acquire_for_cursor(&self) -> Result<(TxGuard, CursorMark), DbError> {
        let guard = self.acquire().await?;
        self.cursor.store(true, Ordering::Release);
        Ok((guard, CursorMark(self.cursor.clone())))
    }

    fn ensure_idle(&self) -> Result<(), DbError> {
        if self.cursor.load(Ordering::Acquire) {
            return Err(DbError::TransactionBusy);
        }
        Ok(())
    }
}

/// Held by an open cursor; releases the transaction reservation on drop.
pub(crate) struct CursorMark(Arc<AtomicBool>);

impl Drop for CursorMark {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxHandle")
            .field("statements", &self.statements())
            .field("cursor_open", &self.cursor.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_scope_refuses_work_without_polling_it() {
        let scope = Scope::new();
        scope.cancel();

        let mut polled = false;
        let result: Result<(), DbError> = scope
            .guard(async {
                polled = true;
                Ok(())
            })
            .await;
        assert!(!polled);
        assert!(matches!(
            result,
            Err(DbError::Interrupted(Interrupted::Cancelled))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_pending_work() {
        let scope = Scope::new().with_timeout(Duration::from_millis(50));
        let result: Result<(), DbError> = scope.guard(std::future::pending()).await;
        assert!(matches!(
            result,
            Err(DbError::Interrupted(Interrupted::DeadlineExceeded))
        ));
    }

    #[tokio::test]
    async fn child_scopes_follow_parent_cancellation() {
        let parent = Scope::new();
        let child = parent.child();
        assert!(child.interrupted().is_none());

        parent.cancel();
        assert_eq!(child.interrupted(), Some(Interrupted::Cancelled));

        let sibling = Scope::new();
        sibling.child().cancel();
        assert!(sibling.interrupted().is_none());
    }

    #[test]
    fn earlier_deadline_wins() {
        let now = Instant::now();
        let scope = Scope::new().with_deadline(now + Duration::from_secs(1));
        let later = scope.with_deadline(now + Duration::from_secs(10));
        assert_eq!(later.deadline(), Some(now + Duration::from_secs(1)));
    }
}
