pub mod error;
pub mod types;
pub mod value;

pub use error::{Result, StoreError};
pub use types::{Column, DataType, IsolationLevel, Row};
pub use value::Value;
