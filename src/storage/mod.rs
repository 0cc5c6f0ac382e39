pub mod engine;
pub mod local;

pub use engine::*;
pub use local::LocalSpool;
