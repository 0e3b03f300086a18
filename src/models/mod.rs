//! Domain models shared by the source, target and migrator layers.

mod result;
mod row;
mod schema;

pub use result::{MediaStats, MigrationResult, MigrationSummary, RecordError, WriteOutcome};
pub use row::{FromSourceRow, Record, RowError, SourceRow, SqlValue};
pub(crate) use schema::parse_max_length;
pub use schema::{ColumnInfo, ForeignKey, TableSchema};
