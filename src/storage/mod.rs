pub mod driver;
pub mod memory;
pub mod sql;
pub mod table;

pub use driver::{
    DataSourceStats, MemoryArray, MemoryConnection, MemoryDataSource, MemoryResultSet,
    MemoryStatement,
};
pub use memory::{Change, MemoryDatabase, RowSet};
pub use table::Table;
