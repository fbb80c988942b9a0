//! Graphics error types.

use std::fmt;

use crate::graph::GraphError;

/// Errors that can occur in the graphics system.
///
/// Every variant except [`SurfaceOutdated`](Self::SurfaceOutdated) is fatal
/// at the frame-graph layer: nothing here is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// Failed to initialize the graphics system.
    InitializationFailed(String),
    /// Failed to create a resource.
    ResourceCreationFailed(String),
    /// Out of GPU memory.
    OutOfMemory,
    /// The GPU device was lost.
    DeviceLost,
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// An internal error occurred.
    Internal(String),
    /// The surface is outdated and needs to be reconfigured.
    SurfaceOutdated,
    /// The surface was lost and needs to be recreated.
    SurfaceLost,
    /// The render graph failed to compile.
    Graph(GraphError),
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::SurfaceOutdated => write!(f, "surface outdated, needs reconfiguration"),
            Self::SurfaceLost => write!(f, "surface lost, needs recreation"),
            Self::Graph(err) => write!(f, "render graph error: {err}"),
        }
    }
}

impl std::error::Error for GraphicsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Graph(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GraphError> for GraphicsError {
    fn from(err: GraphError) -> Self {
        Self::Graph(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = GraphicsError::InitializationFailed("no GPU found".to_string());
        assert_eq!(err.to_string(), "initialization failed: no GPU found");
    }

    #[test]
    fn test_graph_error_wraps() {
        let err: GraphicsError = GraphError::NoRoot {
            candidates: vec!["a".into(), "b".into()],
        }
        .into();
        assert!(matches!(err, GraphicsError::Graph(_)));
        assert!(err.to_string().starts_with("render graph error:"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
