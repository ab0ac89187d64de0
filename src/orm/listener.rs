use crate::core::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Append `listener` unless the same instance is already registered
pub(crate) fn register<T: ?Sized>(listeners: &mut Vec<Arc<T>>, listener: Arc<T>) {
    let present = listeners
        .iter()
        .any(|existing| std::ptr::addr_eq(Arc::as_ptr(existing), Arc::as_ptr(&listener)));
    if !present {
        listeners.push(listener);
    }
}

/// Observer of every SQL statement the store sends
pub trait StatementListener: Send + Sync {
    fn before_execute(&self, _sql: &str, _params: &[Value]) {}

    fn after_execute(&self, _sql: &str, _update_count: Option<u64>) {}
}

/// Logs statements at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingStatementListener;

impl StatementListener for LoggingStatementListener {
    fn before_execute(&self, sql: &str, params: &[Value]) {
        if params.is_empty() {
            debug!("SQL: {}", sql);
        } else {
            let rendered: Vec<String> = params.iter().map(ToString::to_string).collect();
            debug!("SQL: {} [{}]", sql, rendered.join(", "));
        }
    }

    fn after_execute(&self, sql: &str, update_count: Option<u64>) {
        if let Some(count) = update_count {
            debug!("SQL done ({} rows): {}", count, sql);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityEventKind {
    PreInsert,
    PostInsert,
    PreUpdate,
    PostUpdate,
    PreDelete,
    PostDelete,
    PostLoad,
}

impl fmt::Display for EntityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PreInsert => "pre-insert",
            Self::PostInsert => "post-insert",
            Self::PreUpdate => "pre-update",
            Self::PostUpdate => "post-update",
            Self::PreDelete => "pre-delete",
            Self::PostDelete => "post-delete",
            Self::PostLoad => "post-load",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityEvent {
    pub kind: EntityEventKind,
    pub table: String,
    pub key: Value,
}

/// Observer of entity lifecycle transitions
pub trait EntityStateListener: Send + Sync {
    fn on_event(&self, event: &EntityEvent);
}
