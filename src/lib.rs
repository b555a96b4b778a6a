pub mod aggregate;
pub mod compactor;
pub mod config;
pub mod document;
pub mod engine;
pub mod grid;
pub mod limits;
pub mod matrix;
pub mod model;
pub mod notify;
pub mod observability;
pub mod store;
pub mod sync;
pub mod wal;
