pub mod compaction;
pub mod config;
pub mod errors;
pub mod store;
