pub mod backend;
pub mod booking;
pub mod clock;
pub mod compactor;
pub mod config;
pub mod model;
pub mod observability;
pub mod sql;
pub mod store;
pub mod wal;
pub mod wire;
