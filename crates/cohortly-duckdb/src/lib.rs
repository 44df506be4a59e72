pub mod backend;
pub mod cohort_stats;
pub mod schema;
pub mod sources;
pub mod stats_impl;
pub mod user_stats;
pub mod users;

pub use backend::DuckDbBackend;

/// Re-export the `duckdb` crate so consumers (especially tests) can use
/// `cohortly_duckdb::duckdb::params!` without an extra dependency.
pub use duckdb;
