// ============================================================================
// Managed Entity Store
// ============================================================================
//
// Puts an entity store under an external transaction manager.
//
// Eager reads run inside a read transaction that completes before the call
// returns. Lazy reads (iterators and streams) begin a read-only transaction
// and hand it to the returned cursor as a `TransactionLease`; the
// transaction is released when the cursor is closed, not when the call that
// opened it returns.
//
// ============================================================================

pub mod factory;
pub mod iterator;
pub mod lease;
pub mod result;
pub mod store;

pub use factory::ManagedStoreFactory;
pub use iterator::{ManagedIterator, ManagedStream};
pub use lease::{TransactionLease, read_only_operation};
pub use result::{TransactionalResult, TransactionalScalar};
pub use store::ManagedEntityStore;
