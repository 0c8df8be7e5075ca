//! Import queries

pub mod get_run;
pub mod get_stats;
pub mod list_runs;

pub use get_run::{GetRunError, GetRunQuery};
pub use get_stats::{GetStatsError, GetStatsQuery};
pub use list_runs::{ListRunsError, ListRunsQuery, ListRunsResponse};
