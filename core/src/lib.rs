//! # redgraph core
//!
//! Basic utilities shared by the render-graph engine: the worker-thread
//! [`jobs::JobSystem`] used for parallel command recording, and the
//! [`profiling`] macros.

pub mod jobs;
pub mod profiling;

pub use jobs::{JobGroup, JobHandle, JobSystem};

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
