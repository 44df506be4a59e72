pub mod app;
pub mod config;
pub mod error;
pub mod external;
pub mod pipeline;
pub mod routes;
pub mod scheduler;
pub mod state;
