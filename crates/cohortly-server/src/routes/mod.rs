pub mod export;
pub mod health;
pub mod jobs;
pub mod stats;
