pub mod actions;
pub mod bucket;
pub mod checkpoint;
pub mod cohort;
pub mod config;
pub mod dates;
pub mod error;
pub mod external;
pub mod model;
pub mod paging;
pub mod projection;
pub mod store;
pub mod summary;
