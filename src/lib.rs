pub mod compactor;
pub mod config;
pub mod dto;
pub mod error;
pub mod limits;
pub mod model;
pub mod observability;
pub mod scheduler;
pub mod store;
pub mod time;
pub mod wal;
