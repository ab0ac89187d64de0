// ============================================================================
// Transaction Status
// ============================================================================
//
// The handle returned by `TransactionManager::get_transaction`. It moves
// through Active -> Committed | RolledBack and may be completed once.
//
// ============================================================================

use super::TransactionDefinition;
use crate::core::{IsolationLevel, Result, StoreError};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::RolledBack
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::RolledBack => write!(f, "ROLLED BACK"),
        }
    }
}

struct StatusInner {
    id: TransactionId,
    name: Option<String>,
    new_transaction: bool,
    read_only: bool,
    isolation: Option<IsolationLevel>,
    started_at: DateTime<Utc>,
    thread: ThreadId,
    completing: AtomicBool,
    rollback_only: AtomicBool,
    state: Mutex<TransactionState>,
}

/// Handle on an active transaction
///
/// Cloning shares the handle; completion is tracked once across all clones.
#[derive(Clone)]
pub struct TransactionStatus {
    inner: Arc<StatusInner>,
}

impl TransactionStatus {
    /// `new_transaction` is false when the request joined a transaction that
    /// was already running on this thread.
    pub fn new(id: TransactionId, definition: &TransactionDefinition, new_transaction: bool) -> Self {
        Self {
            inner: Arc::new(StatusInner {
                id,
                name: definition.name.clone(),
                new_transaction,
                read_only: definition.read_only,
                isolation: definition.isolation,
                started_at: Utc::now(),
                thread: thread::current().id(),
                completing: AtomicBool::new(false),
                rollback_only: AtomicBool::new(false),
                state: Mutex::new(TransactionState::Active),
            }),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn is_new_transaction(&self) -> bool {
        self.inner.new_transaction
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    pub fn isolation(&self) -> Option<IsolationLevel> {
        self.inner.isolation
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Thread the transaction was requested on
    pub fn thread(&self) -> ThreadId {
        self.inner.thread
    }

    pub fn set_rollback_only(&self) {
        self.inner.rollback_only.store(true, Ordering::SeqCst);
    }

    pub fn is_rollback_only(&self) -> bool {
        self.inner.rollback_only.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> TransactionState {
        match self.inner.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.inner.completing.load(Ordering::SeqCst)
    }

    /// Claim the single completion of this handle
    ///
    /// Managers call this first in `commit` and `rollback`.
    pub fn mark_completing(&self) -> Result<()> {
        if self.inner.completing.swap(true, Ordering::SeqCst) {
            return Err(StoreError::IllegalTransactionState(format!(
                "transaction {} is already completed - do not call commit or rollback more than once per transaction",
                self.inner.id
            )));
        }
        Ok(())
    }

    pub fn mark_completed(&self, state: TransactionState) {
        match self.inner.state.lock() {
            Ok(mut current) => *current = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }
}

impl std::fmt::Debug for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionStatus")
            .field("id", &self.inner.id)
            .field("new_transaction", &self.inner.new_transaction)
            .field("read_only", &self.inner.read_only)
            .field("state", &self.state())
            .finish()
    }
}
