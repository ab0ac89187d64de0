// ============================================================================
// Entity Store
// ============================================================================
//
// A small ORM: entity mapping, lazily executed queries, materialized results
// and scalars, and a blocking store issuing SQL through a data source.
//
// The store either owns transaction boundaries itself (`TransactionMode::Auto`)
// or leaves them entirely to its caller (`TransactionMode::None`).
//
// ============================================================================

pub mod configuration;
pub mod entity;
pub mod listener;
pub mod query;
pub mod result;
mod session;
pub mod store;

pub use configuration::{
    Configuration, ConfigurationBuilder, EmptyEntityCache, EntityCache, MapEntityCache,
    NameTransform, TransactionMode,
};
pub use entity::{Attribute, Entity, EntityModel, EntityType, column_value};
pub use listener::{
    EntityEvent, EntityEventKind, EntityStateListener, LoggingStatementListener, StatementListener,
};
pub use query::{Condition, Operator, Order, QueryElement, QueryProjection, Selection, Tuple};
pub use result::{BufferedIterator, CloseHandler, CloseableIterator, QueryResult, ResultStream, Scalar};
pub use store::{EntityStore, SqlEntityStore};
