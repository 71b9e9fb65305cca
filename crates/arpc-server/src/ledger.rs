//! Transaction ledger
//!
//! Handlers register side effects to finalize once the whole request has
//! succeeded, and compensations to run if any part of it fails.
//!
//! # Dispatcher Contract
//!
//! - After a successful single call or a fully successful atomic program, all
//!   commit callbacks run in registration order. The first failing callback
//!   stops the run and turns the response into an error. Commits are never
//!   retried.
//! - After a failed single call or a failed atomic flush, all rollback
//!   callbacks run in registration order. Rollback failures are logged and do
//!   not replace the original error.
//!
//! # Transactions
//!
//! [`use_transaction`] wraps an external transaction (anything implementing
//! [`Transaction`]). Creators are named by a key: within one request, calls
//! with the same key return the same transaction, and the first call
//! registers one commit and one rollback callback for it. Committing or rolling back the returned
//! [`TrackedTransaction`] by hand settles it immediately: the ledger callback
//! becomes a no-op and the next `use_transaction` call creates a new one.
//!
//! # Example
//!
//! ```
//! use arpc_server::context::{self, RequestContext};
//! use arpc_server::ledger;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let commits = Arc::new(AtomicUsize::new(0));
//! let ctx = RequestContext::new();
//!
//! let counter = commits.clone();
//! context::with_context(ctx.clone(), async move {
//!     ledger::register_commit(move || async move {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!         Ok::<(), anyhow::Error>(())
//!     })
//!     .unwrap();
//! })
//! .await;
//!
//! ledger::commit(&ctx).await.unwrap();
//! assert_eq!(commits.load(Ordering::SeqCst), 1);
//! # });
//! ```

use std::any::{Any, TypeId};
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{OnceCell, SetError};

use crate::context::{self, ContextError, RequestContext, WeakContext};

/// Identifies a cached transaction: its type plus the caller's key.
pub(crate) type TransactionKey = (TypeId, String);

pub type LedgerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub type LedgerCallback = Box<dyn FnOnce() -> LedgerFuture + Send>;

/// Commit and rollback callbacks of one request.
#[derive(Default)]
pub struct Ledger {
    commits: Vec<LedgerCallback>,
    rollbacks: Vec<LedgerCallback>,
}

impl Ledger {
    /// Returns `(commits, rollbacks)` pending in the ledger.
    pub fn len(&self) -> (usize, usize) {
        (self.commits.len(), self.rollbacks.len())
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty() && self.rollbacks.is_empty()
    }

    fn take(&mut self) -> (Vec<LedgerCallback>, Vec<LedgerCallback>) {
        (
            std::mem::take(&mut self.commits),
            std::mem::take(&mut self.rollbacks),
        )
    }
}

fn boxed<F, Fut>(f: F) -> LedgerCallback
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move || Box::pin(f()) as LedgerFuture)
}

/// Appends a commit callback to the current request's ledger.
///
/// # Errors
///
/// [`ContextError::OutsideRequestContext`] when called outside of a request.
pub fn register_commit<F, Fut>(f: F) -> Result<(), ContextError>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let ctx = context::use_context()?;
    ctx.with_state(|state| state.ledger.commits.push(boxed(f)));
    Ok(())
}

/// Appends a rollback callback to the current request's ledger.
///
/// # Errors
///
/// [`ContextError::OutsideRequestContext`] when called outside of a request.
pub fn register_rollback<F, Fut>(f: F) -> Result<(), ContextError>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let ctx = context::use_context()?;
    ctx.with_state(|state| state.ledger.rollbacks.push(boxed(f)));
    Ok(())
}

/// Runs the commit callbacks of `ctx` in registration order.
///
/// Pending rollbacks are discarded. Stops at the first failing callback and
/// returns its error; the remaining commits do not run.
pub async fn commit(ctx: &RequestContext) -> anyhow::Result<()> {
    let (commits, _rollbacks) = ctx.with_state(|state| state.ledger.take());
    if !commits.is_empty() {
        tracing::debug!("Running {} commit callbacks", commits.len());
    }
    for callback in commits {
        callback().await?;
    }
    Ok(())
}

/// Runs the rollback callbacks of `ctx` in registration order.
///
/// Pending commits are discarded. Every callback runs; failures are logged.
pub async fn rollback(ctx: &RequestContext) {
    let (_commits, rollbacks) = ctx.with_state(|state| state.ledger.take());
    if !rollbacks.is_empty() {
        tracing::debug!("Running {} rollback callbacks", rollbacks.len());
    }
    for callback in rollbacks {
        if let Err(e) = callback().await {
            tracing::error!("Rollback callback failed: {:#}", e);
        }
    }
}

/// An external transaction the ledger can finalize.
#[async_trait]
pub trait Transaction: Send + Sync + 'static {
    async fn commit(&self) -> anyhow::Result<()>;
    async fn rollback(&self) -> anyhow::Result<()>;
}

/// Lifecycle of a [`TrackedTransaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Pending,
    Committed,
    RolledBack,
}

struct Tracked<T> {
    tx: T,
    state: Mutex<TransactionState>,
    key: TransactionKey,
    context: WeakContext,
}

/// A transaction created through [`use_transaction`].
///
/// Dereferences to the wrapped transaction. Clones share state.
pub struct TrackedTransaction<T> {
    inner: Arc<Tracked<T>>,
}

impl<T> Clone for TrackedTransaction<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Deref for TrackedTransaction<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.tx
    }
}

impl<T: Transaction> TrackedTransaction<T> {
    fn new(tx: T, key: TransactionKey, ctx: &RequestContext) -> Self {
        Self {
            inner: Arc::new(Tracked {
                tx,
                state: Mutex::new(TransactionState::Pending),
                key,
                context: ctx.downgrade(),
            }),
        }
    }

    pub fn state(&self) -> TransactionState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Moves a pending transaction to `to`. Returns false if already settled.
    fn settle(&self, to: TransactionState) -> bool {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state != TransactionState::Pending {
            return false;
        }
        *state = to;
        true
    }

    /// Removes this transaction from the request's dedup cache.
    fn evict(&self) {
        let Some(ctx) = RequestContext::upgrade(&self.inner.context) else {
            return;
        };
        ctx.with_state(|state| {
            let ours = state
                .transactions
                .get(&self.inner.key)
                .and_then(|entry| entry.clone().downcast::<OnceCell<TrackedTransaction<T>>>().ok())
                .and_then(|cell| cell.get().map(|tx| Arc::ptr_eq(&tx.inner, &self.inner)))
                .unwrap_or(false);
            if ours {
                state.transactions.remove(&self.inner.key);
            }
        });
    }

    /// Commits the transaction now instead of at the end of the request.
    ///
    /// # Errors
    ///
    /// Fails if the transaction was already settled, or if the underlying
    /// commit fails.
    pub async fn commit(&self) -> anyhow::Result<()> {
        if !self.settle(TransactionState::Committed) {
            anyhow::bail!("transaction already settled ({:?})", self.state());
        }
        self.evict();
        self.inner.tx.commit().await
    }

    /// Rolls the transaction back now instead of at the end of the request.
    ///
    /// # Errors
    ///
    /// Fails if the transaction was already settled, or if the underlying
    /// rollback fails.
    pub async fn rollback(&self) -> anyhow::Result<()> {
        if !self.settle(TransactionState::RolledBack) {
            anyhow::bail!("transaction already settled ({:?})", self.state());
        }
        self.evict();
        self.inner.tx.rollback().await
    }

    fn register(&self) -> Result<(), ContextError> {
        let on_commit = self.clone();
        register_commit(move || async move {
            if on_commit.settle(TransactionState::Committed) {
                on_commit.inner.tx.commit().await
            } else {
                Ok(())
            }
        })?;

        let on_rollback = self.clone();
        register_rollback(move || async move {
            if on_rollback.settle(TransactionState::RolledBack) {
                on_rollback.inner.tx.rollback().await
            } else {
                Ok(())
            }
        })
    }
}

fn transaction_cell<T: Transaction>(
    ctx: &RequestContext,
    key: &TransactionKey,
) -> anyhow::Result<Arc<OnceCell<TrackedTransaction<T>>>> {
    let entry = ctx.with_state(|state| {
        state
            .transactions
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(OnceCell::<TrackedTransaction<T>>::new()) as Arc<dyn Any + Send + Sync>
            })
            .clone()
    });
    entry
        .downcast::<OnceCell<TrackedTransaction<T>>>()
        .map_err(|_| anyhow::anyhow!("transaction cache entry has an unexpected type"))
}

/// Returns the request's transaction named `key`, creating it with `creator`
/// on first use.
///
/// Every call passing the same key for the same transaction type shares one
/// transaction per request, and later creators are not run. Creators for
/// different resources need different keys, e.g. one per database URL.
/// Concurrent first calls from joined futures create the transaction once.
///
/// # Errors
///
/// Fails outside of a request context, or if `creator` fails. A failed
/// creation is not cached.
///
/// # Example
///
/// ```
/// use arpc_server::context::{self, RequestContext};
/// use arpc_server::ledger::{self, Transaction};
/// use async_trait::async_trait;
///
/// struct Tx;
///
/// #[async_trait]
/// impl Transaction for Tx {
///     async fn commit(&self) -> anyhow::Result<()> { Ok(()) }
///     async fn rollback(&self) -> anyhow::Result<()> { Ok(()) }
/// }
///
/// async fn begin() -> anyhow::Result<Tx> {
///     Ok(Tx)
/// }
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let ctx = RequestContext::new();
/// context::with_context(ctx.clone(), async {
///     let _a = ledger::use_transaction("orders", begin).await.unwrap();
///     let _b = ledger::use_transaction("orders", begin).await.unwrap();
/// })
/// .await;
/// assert_eq!(ctx.ledger_len(), (1, 1));
/// # });
/// ```
pub async fn use_transaction<F, Fut, T>(key: &str, creator: F) -> anyhow::Result<TrackedTransaction<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
    T: Transaction,
{
    let ctx = context::use_context()?;
    let key: TransactionKey = (TypeId::of::<T>(), key.to_string());
    let cell = transaction_cell::<T>(&ctx, &key)?;

    let tx = cell
        .get_or_try_init(|| async {
            let tx = TrackedTransaction::new(creator().await?, key.clone(), &ctx);
            tx.register()?;
            Ok::<_, anyhow::Error>(tx)
        })
        .await?;

    Ok(tx.clone())
}

/// Synchronous variant of [`use_transaction`].
///
/// # Errors
///
/// Fails outside of a request context, if `creator` fails, or if an async
/// creation for the same key is still in progress.
pub fn use_transaction_sync<F, T>(key: &str, creator: F) -> anyhow::Result<TrackedTransaction<T>>
where
    F: FnOnce() -> anyhow::Result<T>,
    T: Transaction,
{
    let ctx = context::use_context()?;
    let key: TransactionKey = (TypeId::of::<T>(), key.to_string());
    let cell = transaction_cell::<T>(&ctx, &key)?;

    if let Some(tx) = cell.get() {
        return Ok(tx.clone());
    }

    let tx = TrackedTransaction::new(creator()?, key, &ctx);
    match cell.set(tx.clone()) {
        Ok(()) => {
            tx.register()?;
            Ok(tx)
        }
        Err(SetError::AlreadyInitializedError(_)) => cell
            .get()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("transaction cache entry vanished")),
        Err(SetError::InitializingError(_)) => {
            anyhow::bail!("transaction is already being created by a concurrent call")
        }
    }
}
