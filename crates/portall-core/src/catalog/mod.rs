//! Schema catalog types shared by the declared model and live inspection.

mod column;
mod schema;
mod table;

pub use column::{ColumnDef, ColumnType, DefaultValue};
pub use schema::ModelSchema;
pub use table::TableSchema;
