pub mod memory_cache;
pub mod model;

pub use memory_cache::*;
pub use model::*;
