//! Database layer - connection pooling, dynamic values, schema evolution and row writes

pub mod pool;
pub mod schema;
pub mod store;
pub mod value;

pub use pool::{Pool, PoolArgsBuilder};
pub use schema::{SchemaManager, SqlType, TableChange};
pub use store::{ColumnTypeMap, Upsert};
pub use value::{Record, Value};
