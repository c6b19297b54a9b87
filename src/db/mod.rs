pub mod pool;
pub mod posting;
pub mod queries;
pub mod sequence;

pub use pool::{create_pool, run_migrations};
