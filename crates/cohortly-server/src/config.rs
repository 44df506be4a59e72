/// Re-export `Config` from `cohortly-core` for use within this crate.
///
/// All environment-variable parsing lives in `cohortly-core` so integration
/// tests can build a `Config` without depending on the server.
pub use cohortly_core::config::Config;
