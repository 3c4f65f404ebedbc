//! Result store: per-scene CSV files, the SQLite table built from them and
//! seasonal aggregation queries.

pub mod aggregate;
pub mod csv_store;
pub mod record;
pub mod sqlite;

pub use aggregate::{AggFunc, MonthDay, PastureAggregate};
pub use record::PastureStatRecord;
pub use sqlite::{ResultStore, StatsFilter};
